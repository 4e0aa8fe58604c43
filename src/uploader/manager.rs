// 上传管理器
//
// 负责批量上传：
// - 每个文件一个上传任务，由 Semaphore 限制同时上传的文件数
// - 单个文件失败或取消不影响其它文件
// - 任务注册在 DashMap 中，可以随时查询状态
// - 结果按输入顺序汇总为 BatchReport

use crate::uploader::{
    join_remote_path, FailureKind, ProgressSink, UploadEngine, UploadOutcome, UploadTarget,
    UploadTask, UploadTaskStatus,
};
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 默认同时上传的文件数
pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

/// 批量上传中的一个文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 追加在远程目录之后的子目录（文件夹展开时使用）
    pub relative_dir: String,
}

impl BatchEntry {
    pub fn new(local_path: impl Into<PathBuf>, relative_dir: impl Into<String>) -> Self {
        Self {
            local_path: local_path.into(),
            relative_dir: relative_dir.into(),
        }
    }
}

/// 批量上传请求
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub remote: String,
    pub remote_dir: String,
    pub entries: Vec<BatchEntry>,
    /// 分片大小（字节）
    pub chunk_size: u64,
}

impl BatchRequest {
    fn target_for(&self, entry: &BatchEntry) -> UploadTarget {
        UploadTarget::new(
            self.remote.clone(),
            join_remote_path(&[&self.remote_dir, &entry.relative_dir]),
            entry.local_path.clone(),
            self.chunk_size,
        )
    }
}

/// 单个文件的上传报告
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub task_id: String,
    pub local_path: PathBuf,
    pub status: UploadTaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_verified: Option<bool>,
    pub size: u64,
    pub chunks_sent: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileReport {
    pub fn from_outcome(task: &UploadTask, outcome: &UploadOutcome) -> Self {
        let mut report = Self {
            task_id: task.id.clone(),
            local_path: task.target.local_path.clone(),
            status: task.status,
            remote_path: None,
            download_url: None,
            digest: None,
            hash_verified: None,
            size: task.total_size,
            chunks_sent: task.completed_chunks,
            error_kind: outcome.failure_kind(),
            error: None,
        };

        match outcome {
            UploadOutcome::Completed(result) => {
                report.status = UploadTaskStatus::Completed;
                report.remote_path = Some(result.remote_path.clone());
                report.download_url = Some(result.download_url.clone());
                report.digest = result.digest.clone();
                report.hash_verified = result.hash_verified;
                report.size = result.size;
                report.chunks_sent = result.chunks_sent;
            }
            UploadOutcome::Failed(e) => {
                report.status = UploadTaskStatus::Failed;
                report.error = Some(e.to_string());
            }
            UploadOutcome::Aborted => {
                report.status = UploadTaskStatus::Aborted;
                report.error = task.error.clone();
            }
        }

        report
    }

    /// 任务异常退出（panic）时的报告
    fn crashed(task: &UploadTask, message: String) -> Self {
        Self {
            task_id: task.id.clone(),
            local_path: task.target.local_path.clone(),
            status: UploadTaskStatus::Failed,
            remote_path: None,
            download_url: None,
            digest: None,
            hash_verified: None,
            size: task.total_size,
            chunks_sent: task.completed_chunks,
            error_kind: None,
            error: Some(message),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == UploadTaskStatus::Completed
    }
}

/// 批量上传报告（顺序与输入一致）
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn completed_count(&self) -> usize {
        self.count(UploadTaskStatus::Completed)
    }

    pub fn failed_count(&self) -> usize {
        self.count(UploadTaskStatus::Failed)
    }

    pub fn aborted_count(&self) -> usize {
        self.count(UploadTaskStatus::Aborted)
    }

    fn count(&self, status: UploadTaskStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.files.iter().any(|f| !f.is_completed())
    }

    /// 进程退出码：全部完成 0，有失败 1，只有取消 130
    pub fn exit_code(&self) -> i32 {
        if self.failed_count() > 0 {
            1
        } else if self.aborted_count() > 0 {
            130
        } else {
            0
        }
    }
}

/// 上传管理器
pub struct UploadManager {
    /// 上传引擎（所有文件共享）
    engine: Arc<UploadEngine>,
    /// 所有任务（task_id -> task）
    tasks: Arc<DashMap<String, Arc<Mutex<UploadTask>>>>,
    /// 最大同时上传文件数
    max_concurrent_tasks: usize,
    /// 根取消令牌，每个文件使用它的子令牌
    cancel_token: CancellationToken,
}

impl UploadManager {
    pub fn new(engine: Arc<UploadEngine>, max_concurrent_tasks: usize) -> Self {
        Self {
            engine,
            tasks: Arc::new(DashMap::new()),
            max_concurrent_tasks: max_concurrent_tasks.max(1),
            cancel_token: CancellationToken::new(),
        }
    }

    /// 使用外部的取消令牌（例如 Ctrl+C 处理）
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn max_concurrent_tasks(&self) -> usize {
        self.max_concurrent_tasks
    }

    /// 取消所有进行中和等待中的任务
    pub fn cancel_all(&self) {
        info!("取消所有上传任务");
        self.cancel_token.cancel();
    }

    /// 注册上传任务
    fn register_task(&self, target: UploadTarget) -> Arc<Mutex<UploadTask>> {
        let task = UploadTask::new(target);
        let task_id = task.id.clone();
        let task = Arc::new(Mutex::new(task));
        self.tasks.insert(task_id, task.clone());
        task
    }

    /// 获取任务快照
    pub async fn get_task(&self, task_id: &str) -> Option<UploadTask> {
        let task = self.tasks.get(task_id).map(|entry| entry.value().clone())?;
        let snapshot = task.lock().await.clone();
        Some(snapshot)
    }

    /// 获取所有任务快照（按创建时间排序）
    pub async fn get_all_tasks(&self) -> Vec<UploadTask> {
        let handles: Vec<_> = self
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let mut tasks = Vec::with_capacity(handles.len());
        for task in handles {
            tasks.push(task.lock().await.clone());
        }
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// 上传单个文件
    pub async fn upload_file(
        &self,
        target: UploadTarget,
        sink: Arc<dyn ProgressSink>,
    ) -> FileReport {
        let task = self.register_task(target);
        let outcome = self
            .engine
            .upload(task.clone(), sink.as_ref(), self.cancel_token.child_token())
            .await;
        let snapshot = task.lock().await;
        FileReport::from_outcome(&snapshot, &outcome)
    }

    /// 批量上传
    ///
    /// 每个文件都会产生一条报告，顺序与 `request.entries` 一致
    pub async fn upload_batch(
        &self,
        request: BatchRequest,
        sink: Arc<dyn ProgressSink>,
    ) -> BatchReport {
        let total = request.entries.len();
        info!(
            "开始批量上传: remote={}, remote_dir={}, files={}, max_concurrent={}",
            request.remote, request.remote_dir, total, self.max_concurrent_tasks
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_tasks));
        let mut join_set = JoinSet::new();
        let mut handles = Vec::with_capacity(total);

        for (index, entry) in request.entries.iter().enumerate() {
            let task = self.register_task(request.target_for(entry));
            handles.push(task.clone());

            let engine = self.engine.clone();
            let semaphore = semaphore.clone();
            let sink = sink.clone();
            let cancel_token = self.cancel_token.child_token();

            join_set.spawn(async move {
                // 等待许可时也要响应取消
                let permit = tokio::select! {
                    biased;
                    _ = cancel_token.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };

                let outcome = match permit {
                    Some(_permit) => engine.upload(task.clone(), sink.as_ref(), cancel_token).await,
                    None => {
                        task.lock().await.mark_aborted();
                        UploadOutcome::Aborted
                    }
                };

                let snapshot = task.lock().await;
                (index, FileReport::from_outcome(&snapshot, &outcome))
            });
        }

        let mut reports: Vec<Option<FileReport>> = (0..total).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, report)) => reports[index] = Some(report),
                Err(e) => error!("上传任务异常退出: {}", e),
            }
        }

        let mut files = Vec::with_capacity(total);
        for (report, task) in reports.into_iter().zip(handles) {
            let report = match report {
                Some(report) => report,
                None => {
                    let mut t = task.lock().await;
                    t.mark_failed("上传任务异常退出".to_string());
                    FileReport::crashed(&t, "上传任务异常退出".to_string())
                }
            };
            files.push(report);
        }

        let report = BatchReport { files };
        if report.has_failures() {
            warn!(
                "批量上传结束: 完成 {}, 失败 {}, 取消 {}",
                report.completed_count(),
                report.failed_count(),
                report.aborted_count()
            );
        } else {
            info!("批量上传完成: {} 个文件", report.completed_count());
        }

        report
    }
}
