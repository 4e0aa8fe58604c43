// 网盘API模块

pub mod client;
pub mod traits;
pub mod types;

pub use client::GraphClient;
pub use traits::{ChunkUploader, SessionNegotiator};
pub use types::*;
