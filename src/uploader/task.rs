// 上传任务定义
//
// 单个文件上传的状态机：
// Idle → TokenAcquired → SessionCreated → Uploading → Completed
// 任一非终态都可能进入 Failed（Idle 除外）或 Aborted

use crate::uploader::{FailureKind, UploadError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// 拼接远程路径
///
/// 去掉空段和多余的 `/`，结果不以 `/` 开头或结尾
pub fn join_remote_path(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// 上传目标（上传开始后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTarget {
    /// 远程存储标识（如 oned）
    pub remote: String,
    /// 远程目标目录（相对于上传根目录）
    pub remote_dir: String,
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 分片大小（字节）
    pub chunk_size: u64,
}

impl UploadTarget {
    pub fn new(
        remote: impl Into<String>,
        remote_dir: impl Into<String>,
        local_path: impl Into<PathBuf>,
        chunk_size: u64,
    ) -> Self {
        Self {
            remote: remote.into(),
            remote_dir: remote_dir.into(),
            local_path: local_path.into(),
            chunk_size,
        }
    }

    /// 本地文件名（含扩展名）
    pub fn file_name(&self) -> Result<String, UploadError> {
        self.local_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.to_string())
            .ok_or_else(|| {
                UploadError::InvalidTarget(format!("无法获取文件名: {:?}", self.local_path))
            })
    }

    /// 相对于上传根目录的最终路径：远程目录 + 文件名
    pub fn final_remote_path(&self) -> Result<String, UploadError> {
        let file_name = self.file_name()?;
        Ok(join_remote_path(&[&self.remote_dir, &file_name]))
    }

    /// 创建会话使用的完整路径：上传根目录 + 远程目录 + 文件名
    pub fn session_path(&self, upload_root_path: &str) -> Result<String, UploadError> {
        let final_path = self.final_remote_path()?;
        Ok(join_remote_path(&[upload_root_path, &final_path]))
    }
}

/// 下载地址：base_url + "/" + 最终路径（直接拼接，不再查询远端）
pub fn build_download_url(base_url: &str, final_remote_path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), final_remote_path)
}

/// 上传任务状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UploadTaskStatus {
    /// 等待中
    Idle,
    /// 已获取令牌
    TokenAcquired,
    /// 已创建上传会话
    SessionCreated,
    /// 上传中
    Uploading,
    /// 已完成
    Completed,
    /// 失败
    Failed,
    /// 用户中断
    Aborted,
}

impl UploadTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadTaskStatus::Completed | UploadTaskStatus::Failed | UploadTaskStatus::Aborted
        )
    }
}

/// 上传任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadTask {
    /// 任务ID
    pub id: String,
    /// 上传目标
    pub target: UploadTarget,
    /// 文件大小（打开文件后才知道）
    pub total_size: u64,
    /// 已上传大小
    pub uploaded_size: u64,
    /// 已哈希大小
    pub hashed_size: u64,
    /// 任务状态
    pub status: UploadTaskStatus,
    /// 总分片数
    #[serde(default)]
    pub total_chunks: usize,
    /// 已完成分片数
    #[serde(default)]
    pub completed_chunks: usize,
    /// 创建时间 (Unix timestamp)
    pub created_at: i64,
    /// 开始时间 (Unix timestamp)
    pub started_at: Option<i64>,
    /// 完成时间 (Unix timestamp)
    pub completed_at: Option<i64>,
    /// 错误信息
    pub error: Option<String>,
}

impl UploadTask {
    /// 创建新的上传任务
    pub fn new(target: UploadTarget) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target,
            total_size: 0,
            uploaded_size: 0,
            hashed_size: 0,
            status: UploadTaskStatus::Idle,
            total_chunks: 0,
            completed_chunks: 0,
            created_at: chrono::Utc::now().timestamp(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// 计算进度百分比
    pub fn progress(&self) -> f64 {
        if self.total_size == 0 {
            return if self.status == UploadTaskStatus::Completed {
                100.0
            } else {
                0.0
            };
        }
        (self.uploaded_size as f64 / self.total_size as f64) * 100.0
    }

    /// 标记为已获取令牌
    pub fn mark_token_acquired(&mut self) {
        self.status = UploadTaskStatus::TokenAcquired;
        if self.started_at.is_none() {
            self.started_at = Some(chrono::Utc::now().timestamp());
        }
    }

    /// 标记为会话已创建
    pub fn mark_session_created(&mut self) {
        self.status = UploadTaskStatus::SessionCreated;
    }

    /// 标记为上传中
    pub fn mark_uploading(&mut self, total_size: u64, total_chunks: usize) {
        self.status = UploadTaskStatus::Uploading;
        self.total_size = total_size;
        self.total_chunks = total_chunks;
    }

    /// 标记为已完成
    pub fn mark_completed(&mut self) {
        self.status = UploadTaskStatus::Completed;
        self.completed_at = Some(chrono::Utc::now().timestamp());
        self.uploaded_size = self.total_size;
    }

    /// 标记为失败
    pub fn mark_failed(&mut self, error: String) {
        self.status = UploadTaskStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }

    /// 标记为用户中断
    pub fn mark_aborted(&mut self) {
        self.status = UploadTaskStatus::Aborted;
        self.error = Some(UploadError::Aborted.to_string());
        self.completed_at = Some(chrono::Utc::now().timestamp());
    }
}

/// 上传结果（每个文件最多产生一次）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResult {
    /// 相对于上传根目录的路径
    pub remote_path: String,
    /// 下载地址
    pub download_url: String,
    /// QuickXor 摘要（base64），关闭哈希时为 None
    pub digest: Option<String>,
    /// 文件大小
    pub size: u64,
    /// 实际发送的分片数
    pub chunks_sent: usize,
    /// 是否成功
    pub success: bool,
    /// 与服务端 quickXorHash 的比对结果（服务端未返回时为 None）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_verified: Option<bool>,
}

/// 单个文件的最终结果
#[derive(Debug)]
pub enum UploadOutcome {
    Completed(UploadResult),
    Failed(UploadError),
    Aborted,
}

impl UploadOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, UploadOutcome::Completed(_))
    }

    /// 失败类别，完成时返回 None
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            UploadOutcome::Completed(_) => None,
            UploadOutcome::Failed(e) => Some(e.kind()),
            UploadOutcome::Aborted => Some(FailureKind::Aborted),
        }
    }
}

impl From<Result<UploadResult, UploadError>> for UploadOutcome {
    fn from(result: Result<UploadResult, UploadError>) -> Self {
        match result {
            Ok(r) => UploadOutcome::Completed(r),
            Err(UploadError::Aborted) => UploadOutcome::Aborted,
            Err(e) => UploadOutcome::Failed(e),
        }
    }
}
