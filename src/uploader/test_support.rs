// 上传模块测试用的模拟实现

use crate::auth::{RemoteCredentials, TokenProvider};
use crate::netdisk::{
    ChunkAck, ChunkUploader, DriveItem, DriveItemFile, FileHashes, SessionNegotiator,
    UploadSession,
};
use crate::uploader::{ChunkDescriptor, QuickXorHash, UploadError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

pub async fn write_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.unwrap();
    }
    tokio::fs::write(&path, data).await.unwrap();
    path
}

pub fn credentials() -> RemoteCredentials {
    serde_json::from_value(serde_json::json!({
        "access_token": "mock-token",
        "expires_in": 3600,
        "base_url": "https://index.example.com/",
        "upload_root_path": "/Public/"
    }))
    .unwrap()
}

/// 返回固定凭证或固定错误的令牌提供方
pub struct MockTokenProvider {
    status: Option<u16>,
    calls: AtomicUsize,
}

impl MockTokenProvider {
    pub fn ok() -> Self {
        Self {
            status: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(status: u16) -> Self {
        Self {
            status: Some(status),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for MockTokenProvider {
    async fn fetch_credentials(&self, remote: &str) -> Result<RemoteCredentials, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.status {
            Some(status) => Err(UploadError::Auth {
                remote: remote.to_string(),
                status: Some(status),
                message: "denied".to_string(),
            }),
            None => Ok(credentials()),
        }
    }
}

/// 记录会话路径的协商器，会话 URL 中带上目标路径
pub struct MockNegotiator {
    fail: bool,
    paths: Mutex<Vec<String>>,
}

impl MockNegotiator {
    pub fn ok() -> Self {
        Self {
            fail: false,
            paths: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            paths: Mutex::new(Vec::new()),
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.paths.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionNegotiator for MockNegotiator {
    async fn create_session(
        &self,
        _credentials: &RemoteCredentials,
        remote_path: &str,
    ) -> Result<UploadSession, UploadError> {
        self.paths.lock().unwrap().push(remote_path.to_string());
        if self.fail {
            return Err(UploadError::Session {
                remote_path: remote_path.to_string(),
                status: Some(500),
                message: "session refused".to_string(),
            });
        }
        Ok(UploadSession::new(format!("mock://session/{}", remote_path)))
    }
}

/// 在途请求计数守卫
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 记录所有分片请求的上传器
///
/// 按会话累积收到的字节，最后一个分片返回带 quickXorHash 的文件信息
#[derive(Default)]
pub struct RecordingUploader {
    ranges: Mutex<Vec<String>>,
    received: Mutex<HashMap<String, Vec<u8>>>,
    fail_chunk: Option<(usize, u16)>,
    fail_session_containing: Option<String>,
    hang_chunk: Option<usize>,
    hang_session_containing: Option<String>,
    transient_failures: AtomicUsize,
    wrong_remote_hash: bool,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on_chunk(mut self, index: usize, status: u16) -> Self {
        self.fail_chunk = Some((index, status));
        self
    }

    pub fn fail_sessions_containing(mut self, pattern: &str) -> Self {
        self.fail_session_containing = Some(pattern.to_string());
        self
    }

    pub fn hang_on_chunk(mut self, index: usize) -> Self {
        self.hang_chunk = Some(index);
        self
    }

    /// 会话 URL 含有 pattern 的文件，第一个分片就不再返回
    pub fn hang_sessions_containing(mut self, pattern: &str) -> Self {
        self.hang_session_containing = Some(pattern.to_string());
        self
    }

    /// 前 n 次请求返回 503
    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_wrong_remote_hash(mut self) -> Self {
        self.wrong_remote_hash = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn ranges(&self) -> Vec<String> {
        self.ranges.lock().unwrap().clone()
    }

    /// 所有会话收到的字节（只有一个会话时即为文件内容）
    pub fn received_bytes(&self) -> Vec<u8> {
        let received = self.received.lock().unwrap();
        let mut sessions: Vec<_> = received.keys().cloned().collect();
        sessions.sort();
        sessions
            .iter()
            .flat_map(|s| received[s].iter().copied())
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ChunkUploader for RecordingUploader {
    async fn send(
        &self,
        session: &UploadSession,
        descriptor: &ChunkDescriptor,
        data: Vec<u8>,
    ) -> Result<ChunkAck, UploadError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let content_range = descriptor.content_range();
        self.ranges.lock().unwrap().push(content_range.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let hang_session = self
            .hang_session_containing
            .as_deref()
            .is_some_and(|pattern| session.upload_url.contains(pattern));
        if hang_session || self.hang_chunk == Some(descriptor.index) {
            std::future::pending::<()>().await;
        }

        let rejected = |status: u16, body: &str| UploadError::ChunkUpload {
            content_range: content_range.clone(),
            status: Some(status),
            body: body.to_string(),
        };

        if self.take_transient_failure() {
            return Err(rejected(503, "service unavailable"));
        }
        if let Some((index, status)) = self.fail_chunk {
            if index == descriptor.index {
                return Err(rejected(status, "rejected"));
            }
        }
        if let Some(pattern) = &self.fail_session_containing {
            if session.upload_url.contains(pattern.as_str()) {
                return Err(rejected(500, "broken session"));
            }
        }

        let mut received = self.received.lock().unwrap();
        let buffer = received.entry(session.upload_url.clone()).or_default();
        assert_eq!(buffer.len() as u64, descriptor.range.start, "ranges must be contiguous");
        buffer.extend_from_slice(&data);

        if descriptor.range.end < descriptor.total_size {
            return Ok(ChunkAck {
                status: 202,
                item: None,
            });
        }

        let mut hasher = QuickXorHash::new();
        hasher.update(buffer);
        let quick_xor_hash = if self.wrong_remote_hash {
            "AAAAAAAAAAAAAAAAAAAAAAAAAAA=".to_string()
        } else {
            hasher.digest_base64()
        };

        Ok(ChunkAck {
            status: 201,
            item: Some(DriveItem {
                size: Some(descriptor.total_size),
                file: Some(DriveItemFile {
                    hashes: Some(FileHashes {
                        quick_xor_hash: Some(quick_xor_hash),
                    }),
                }),
                ..DriveItem::default()
            }),
        })
    }
}
