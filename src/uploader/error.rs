// 上传错误定义
//
// 所有错误都只对所属文件致命，批量上传时由 UploadManager 按文件隔离

use crate::netdisk::UploadErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 失败类别（用于上报和退出码）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 获取令牌失败
    Auth,
    /// 创建上传会话失败
    Session,
    /// 分片上传失败
    ChunkUpload,
    /// 本地文件读取失败
    Io,
    /// 用户中断
    Aborted,
    /// 参数无效（未知 remote、分片大小为 0 等）
    InvalidTarget,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Auth => "AuthError",
            FailureKind::Session => "SessionError",
            FailureKind::ChunkUpload => "ChunkUploadError",
            FailureKind::Io => "IOError",
            FailureKind::Aborted => "Aborted",
            FailureKind::InvalidTarget => "InvalidTarget",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 上传错误
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("获取 {remote} 的访问令牌失败: {message}")]
    Auth {
        remote: String,
        status: Option<u16>,
        message: String,
    },

    #[error("创建上传会话失败 ({remote_path}): {message}")]
    Session {
        remote_path: String,
        status: Option<u16>,
        message: String,
    },

    #[error(
        "上传分片失败 {content_range}, status: {}, error: {body}",
        display_status(.status)
    )]
    ChunkUpload {
        content_range: String,
        status: Option<u16>,
        body: String,
    },

    #[error("读取本地文件失败 {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("上传已取消")]
    Aborted,

    #[error("无效的上传参数: {0}")]
    InvalidTarget(String),
}

fn display_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "无响应".to_string(),
    }
}

impl UploadError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        UploadError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            UploadError::Auth { .. } => FailureKind::Auth,
            UploadError::Session { .. } => FailureKind::Session,
            UploadError::ChunkUpload { .. } => FailureKind::ChunkUpload,
            UploadError::Io { .. } => FailureKind::Io,
            UploadError::Aborted => FailureKind::Aborted,
            UploadError::InvalidTarget(_) => FailureKind::InvalidTarget,
        }
    }

    /// 分片错误的重试分类，其它错误返回 None
    pub fn chunk_error_kind(&self) -> Option<UploadErrorKind> {
        match self {
            UploadError::ChunkUpload { status: None, .. } => Some(UploadErrorKind::Network),
            UploadError::ChunkUpload {
                status: Some(code), ..
            } => Some(UploadErrorKind::from_status(*code)),
            _ => None,
        }
    }

    /// 是否可重试（只有分片上传错误可能重试）
    pub fn is_retriable(&self) -> bool {
        self.chunk_error_kind()
            .map(|kind| kind.is_retriable())
            .unwrap_or(false)
    }
}
