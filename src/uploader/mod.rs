// 上传模块
//
// - 分片读取与区间计算（chunk）
// - QuickXor 流式摘要（quickxor）
// - 单文件上传状态机（engine + task）
// - 批量上传与并发控制（manager）

pub mod chunk;
pub mod engine;
pub mod error;
pub mod folder;
pub mod manager;
pub mod progress;
pub mod quickxor;
pub mod task;

#[cfg(test)]
pub(crate) mod test_support;

pub use chunk::{
    chunk_size_from_mb, validate_chunk_size_mb, ChunkBuffer, ChunkDescriptor, ChunkPlan,
    ChunkReader, BYTES_PER_MB, DEFAULT_CHUNK_SIZE_MB, MAX_CHUNK_SIZE_MB, MIN_CHUNK_SIZE_MB,
};
pub use engine::{EngineOptions, UploadEngine};
pub use error::{FailureKind, UploadError};
pub use folder::{format_bytes, FolderScanner, ScanOptions, ScannedFile};
pub use manager::{
    BatchEntry, BatchReport, BatchRequest, FileReport, UploadManager,
    DEFAULT_MAX_CONCURRENT_TASKS,
};
pub use progress::{NoopProgress, ProgressSink, ProgressState, ProgressUpdate};
pub use quickxor::{hash_file, QuickXorHash, DIGEST_LEN};
pub use task::{
    build_download_url, join_remote_path, UploadOutcome, UploadResult, UploadTarget, UploadTask,
    UploadTaskStatus,
};
