// 上传引擎
//
// 负责单个文件的完整上传流程：
// 1. 获取访问令牌
// 2. 创建上传会话
// 3. 按顺序读取分片、累加哈希、发送分片（每个分片确认后才推进）
// 4. 汇总上传结果并与服务端哈希比对
//
// 取消令牌在每个等待点都会被检查，触发后任务进入 Aborted

use crate::auth::TokenProvider;
use crate::netdisk::{ChunkAck, ChunkUploader, SessionNegotiator, UploadErrorKind, UploadSession};
use crate::uploader::{
    build_download_url, ChunkBuffer, ChunkReader, ProgressSink, ProgressState, ProgressUpdate,
    QuickXorHash, UploadError, UploadOutcome, UploadResult, UploadTarget, UploadTask,
};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =====================================================
// 重试配置
// =====================================================

/// 初始退避延迟（毫秒）
const INITIAL_BACKOFF_MS: u64 = 100;

/// 最大退避延迟（毫秒）
const MAX_BACKOFF_MS: u64 = 5000;

/// 限流时的最短等待时间（毫秒）
const RATE_LIMIT_BACKOFF_MS: u64 = 10000;

/// 计算指数退避延迟
///
/// - retry_count=0: 100ms
/// - retry_count=1: 200ms
/// - retry_count=2: 400ms
/// - 最大: 5000ms，限流时至少 10000ms
fn calculate_backoff_delay(retry_count: u32, error_kind: &UploadErrorKind) -> u64 {
    let base_delay = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    let delay = base_delay.min(MAX_BACKOFF_MS);

    if matches!(error_kind, UploadErrorKind::RateLimited) {
        delay.max(RATE_LIMIT_BACKOFF_MS)
    } else {
        delay
    }
}

/// 在取消令牌触发时提前返回 Aborted
async fn cancellable<T, F>(cancel_token: &CancellationToken, fut: F) -> Result<T, UploadError>
where
    F: Future<Output = Result<T, UploadError>>,
{
    tokio::select! {
        biased;
        _ = cancel_token.cancelled() => Err(UploadError::Aborted),
        result = fut => result,
    }
}

// =====================================================
// 上传引擎
// =====================================================

/// 引擎选项
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// 是否在上传过程中计算 QuickXor 摘要
    pub compute_hash: bool,
    /// 可重试分片错误的最大重试次数（0 = 不重试）
    pub max_retries: u32,
    /// 允许使用的 remote 列表
    pub remotes: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            compute_hash: true,
            max_retries: 0,
            remotes: Vec::new(),
        }
    }
}

/// 上传引擎
///
/// 无状态，可以被多个文件共享；每次 `upload` 只处理一个任务
pub struct UploadEngine {
    token_provider: Arc<dyn TokenProvider>,
    negotiator: Arc<dyn SessionNegotiator>,
    uploader: Arc<dyn ChunkUploader>,
    options: EngineOptions,
}

impl UploadEngine {
    pub fn new(
        token_provider: Arc<dyn TokenProvider>,
        negotiator: Arc<dyn SessionNegotiator>,
        uploader: Arc<dyn ChunkUploader>,
        options: EngineOptions,
    ) -> Self {
        Self {
            token_provider,
            negotiator,
            uploader,
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// 上传单个文件，返回最终结果
    ///
    /// 任务状态随流程推进；无论成功与否，返回时任务都处于终态
    pub async fn upload(
        &self,
        task: Arc<Mutex<UploadTask>>,
        sink: &dyn ProgressSink,
        cancel_token: CancellationToken,
    ) -> UploadOutcome {
        let (task_id, target) = {
            let t = task.lock().await;
            (t.id.clone(), t.target.clone())
        };

        info!(
            "开始上传任务: id={}, local={:?}, remote={}:{}",
            task_id, target.local_path, target.remote, target.remote_dir
        );

        let result = self
            .run(&task_id, &target, &task, sink, &cancel_token)
            .await;

        {
            let mut t = task.lock().await;
            match &result {
                Ok(_) => t.mark_completed(),
                Err(UploadError::Aborted) => t.mark_aborted(),
                Err(e) => t.mark_failed(e.to_string()),
            }
        }

        match &result {
            Ok(r) => info!(
                "上传完成: id={}, remote_path={}, chunks={}, digest={:?}",
                task_id, r.remote_path, r.chunks_sent, r.digest
            ),
            Err(UploadError::Aborted) => warn!("上传已取消: id={}", task_id),
            Err(e) => error!("上传失败: id={}, kind={}, error={}", task_id, e.kind(), e),
        }

        UploadOutcome::from(result)
    }

    async fn run(
        &self,
        task_id: &str,
        target: &UploadTarget,
        task: &Arc<Mutex<UploadTask>>,
        sink: &dyn ProgressSink,
        cancel_token: &CancellationToken,
    ) -> Result<UploadResult, UploadError> {
        self.validate_target(target)?;
        let file_name = target.file_name()?;
        let final_remote_path = target.final_remote_path()?;

        // Idle → TokenAcquired
        let credentials = cancellable(
            cancel_token,
            self.token_provider.fetch_credentials(&target.remote),
        )
        .await?;
        task.lock().await.mark_token_acquired();

        // TokenAcquired → SessionCreated
        let session_path = target.session_path(&credentials.upload_root_path)?;
        let session = cancellable(
            cancel_token,
            self.negotiator.create_session(&credentials, &session_path),
        )
        .await?;
        task.lock().await.mark_session_created();
        debug!("[{}] 上传会话已创建: {}", task_id, session_path);

        // SessionCreated → Uploading
        let reader = cancellable(
            cancel_token,
            ChunkReader::open(&target.local_path, target.chunk_size),
        )
        .await?;
        let total_size = reader.file_size();
        let chunk_count = reader.plan().chunk_count();
        task.lock().await.mark_uploading(total_size, chunk_count);

        info!(
            "[{}] 开始上传分片: size={}, chunks={}, chunk_size={}",
            task_id, total_size, chunk_count, target.chunk_size
        );

        let mut hasher = self.options.compute_hash.then(QuickXorHash::new);
        let mut progress = ProgressState::new(total_size);
        let mut last_ack: Option<ChunkAck> = None;
        let mut chunks_sent = 0usize;

        let chunks = reader.into_stream();
        futures::pin_mut!(chunks);

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel_token.cancelled() => return Err(UploadError::Aborted),
                next = chunks.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            let chunk_len = chunk.descriptor.size();

            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk.data);
                progress.advance_hashed(chunk_len);
            }

            let ack = self.send_with_retry(&session, &chunk, cancel_token).await?;

            progress.advance_uploaded(chunk_len);
            chunks_sent += 1;
            {
                let mut t = task.lock().await;
                t.uploaded_size = progress.bytes_uploaded;
                t.hashed_size = progress.bytes_hashed;
                t.completed_chunks = chunks_sent;
            }
            report_progress(sink, task_id, &file_name, progress);
            last_ack = Some(ack);
        }

        // 空文件没有分片，只上报一次 100
        if total_size == 0 {
            report_progress(sink, task_id, &file_name, progress);
        }

        let digest = hasher.map(|h| h.digest_base64());
        let remote_hash = last_ack
            .as_ref()
            .and_then(|ack| ack.item.as_ref())
            .and_then(|item| item.quick_xor_hash());

        let hash_verified = match (&digest, remote_hash) {
            (Some(local), Some(remote)) => {
                let matched = local == remote;
                if !matched {
                    warn!(
                        "[{}] QuickXor 校验不一致: local={}, remote={}",
                        task_id, local, remote
                    );
                }
                Some(matched)
            }
            _ => None,
        };

        Ok(UploadResult {
            download_url: build_download_url(&credentials.base_url, &final_remote_path),
            remote_path: final_remote_path,
            digest,
            size: total_size,
            chunks_sent,
            success: true,
            hash_verified,
        })
    }

    fn validate_target(&self, target: &UploadTarget) -> Result<(), UploadError> {
        if target.chunk_size == 0 {
            return Err(UploadError::InvalidTarget("分片大小必须大于 0".to_string()));
        }
        if !self.options.remotes.iter().any(|r| r == &target.remote) {
            return Err(UploadError::InvalidTarget(format!(
                "未知的 remote: {}（可用: {}）",
                target.remote,
                self.options.remotes.join(", ")
            )));
        }
        Ok(())
    }

    /// 发送单个分片，可重试错误按指数退避重试
    ///
    /// 重试时发送完全相同的区间，服务端看到的区间序列依然连续
    async fn send_with_retry(
        &self,
        session: &UploadSession,
        chunk: &ChunkBuffer,
        cancel_token: &CancellationToken,
    ) -> Result<ChunkAck, UploadError> {
        let descriptor = &chunk.descriptor;
        let max_retries = self.options.max_retries;
        let mut retry = 0u32;

        loop {
            let result = cancellable(
                cancel_token,
                self.uploader.send(session, descriptor, chunk.data.clone()),
            )
            .await;

            match result {
                Ok(ack) => {
                    debug!(
                        "[分片#{}] 上传成功: {}, status={}",
                        descriptor.index,
                        descriptor.content_range(),
                        ack.status
                    );
                    return Ok(ack);
                }
                Err(UploadError::Aborted) => return Err(UploadError::Aborted),
                Err(e) => {
                    if !e.is_retriable() || retry >= max_retries {
                        if retry > 0 {
                            error!(
                                "[分片#{}] 重试 {} 次后仍然失败: {}",
                                descriptor.index, retry, e
                            );
                        }
                        return Err(e);
                    }

                    let error_kind = e.chunk_error_kind().unwrap_or(UploadErrorKind::Unknown);
                    let backoff_ms = calculate_backoff_delay(retry, &error_kind);
                    warn!(
                        "[分片#{}] 上传失败，等待 {}ms 后重试 ({}/{}): {}",
                        descriptor.index,
                        backoff_ms,
                        retry + 1,
                        max_retries,
                        e
                    );

                    cancellable(cancel_token, async {
                        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                        Ok::<(), UploadError>(())
                    })
                    .await?;
                    retry += 1;
                }
            }
        }
    }
}

fn report_progress(sink: &dyn ProgressSink, task_id: &str, file_name: &str, state: ProgressState) {
    sink.on_progress(&ProgressUpdate {
        task_id: task_id.to_string(),
        file_name: file_name.to_string(),
        percent: state.percent(),
        state,
    });
}
