// ksau-rust
// 分片上传本地文件到 Microsoft Graph 网盘

// 认证模块（令牌服务）
pub mod auth;

// 配置管理模块
pub mod config;

// 控制台进度条
pub mod console;

// 日志系统
pub mod logging;

// Graph 网盘API模块
pub mod netdisk;

// 上传引擎模块
pub mod uploader;

// 导出常用类型
pub use auth::{CachedTokenProvider, KsauTokenProvider, RemoteCredentials, TokenProvider};
pub use config::AppConfig;
pub use console::ConsoleProgress;
pub use netdisk::{ChunkUploader, GraphClient, SessionNegotiator};
pub use uploader::{
    hash_file, BatchReport, BatchRequest, EngineOptions, FileReport, QuickXorHash, UploadEngine,
    UploadError, UploadManager, UploadOutcome, UploadResult, UploadTarget, UploadTask,
    UploadTaskStatus,
};
