// Graph 网盘接口数据类型定义

use serde::{Deserialize, Serialize};

/// 同名文件冲突处理策略
///
/// 对应 `@microsoft.graph.conflictBehavior`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    /// 冲突时自动重命名（默认，避免覆盖）
    #[default]
    Rename,
    /// 冲突时覆盖
    Replace,
    /// 冲突时直接失败
    Fail,
}

impl ConflictBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictBehavior::Rename => "rename",
            ConflictBehavior::Replace => "replace",
            ConflictBehavior::Fail => "fail",
        }
    }
}

/// createUploadSession 请求体
#[derive(Debug, Clone, Serialize)]
pub struct CreateUploadSessionRequest {
    pub item: UploadSessionItem,
}

/// 上传会话的文件属性
#[derive(Debug, Clone, Serialize)]
pub struct UploadSessionItem {
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: ConflictBehavior,
}

impl CreateUploadSessionRequest {
    pub fn new(conflict_behavior: ConflictBehavior) -> Self {
        Self {
            item: UploadSessionItem { conflict_behavior },
        }
    }
}

/// 上传会话
///
/// 一个会话只对应一个目标路径，只能由一个上传引擎独占使用
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// 接受分片 PUT 的会话 URL（已预授权，不需要 Bearer 令牌）
    pub upload_url: String,
    /// 会话过期时间
    #[serde(default)]
    pub expiration_date_time: Option<String>,
}

impl UploadSession {
    pub fn new(upload_url: impl Into<String>) -> Self {
        Self {
            upload_url: upload_url.into(),
            expiration_date_time: None,
        }
    }
}

/// 上传完成后服务端返回的文件信息
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub web_url: Option<String>,
    #[serde(default)]
    pub file: Option<DriveItemFile>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DriveItemFile {
    #[serde(default)]
    pub hashes: Option<FileHashes>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileHashes {
    #[serde(default)]
    pub quick_xor_hash: Option<String>,
}

impl DriveItem {
    /// 服务端计算的 QuickXor 哈希（base64）
    pub fn quick_xor_hash(&self) -> Option<&str> {
        self.file
            .as_ref()
            .and_then(|f| f.hashes.as_ref())
            .and_then(|h| h.quick_xor_hash.as_deref())
    }
}

/// 分片上传确认
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkAck {
    /// HTTP 状态码
    pub status: u16,
    /// 最后一个分片完成时返回的文件信息（中间分片为 None）
    pub item: Option<DriveItem>,
}

/// 上传错误类型（用于重试判定）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadErrorKind {
    /// 网络错误（可重试）
    Network,
    /// 超时（可重试）
    Timeout,
    /// 服务器错误（可重试）
    ServerError,
    /// 限流（可重试，需要更长等待时间）
    RateLimited,
    /// 会话不存在或已过期（不可重试）
    SessionNotFound,
    /// 权限不足（不可重试）
    Forbidden,
    /// 参数错误或分片范围不匹配（不可重试）
    BadRequest,
    /// 空间不足（不可重试）
    QuotaExceeded,
    /// 未知错误
    Unknown,
}

impl UploadErrorKind {
    /// 是否可重试
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            UploadErrorKind::Network
                | UploadErrorKind::Timeout
                | UploadErrorKind::ServerError
                | UploadErrorKind::RateLimited
        )
    }

    /// 从 HTTP 状态码转换
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 504 => UploadErrorKind::Timeout,
            429 => UploadErrorKind::RateLimited,
            404 | 410 => UploadErrorKind::SessionNotFound,
            401 | 403 => UploadErrorKind::Forbidden,
            400 | 409 | 416 => UploadErrorKind::BadRequest,
            507 => UploadErrorKind::QuotaExceeded,
            500..=599 => UploadErrorKind::ServerError,
            _ => UploadErrorKind::Unknown,
        }
    }
}
