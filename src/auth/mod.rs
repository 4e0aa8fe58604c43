// 认证模块

pub mod token;
pub mod types;

pub use token::{CachedTokenProvider, KsauTokenProvider, TokenProvider};
pub use types::RemoteCredentials;
