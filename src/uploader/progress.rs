// 上传进度
//
// 进度通过显式传入的 ProgressSink 上报，不存在全局共享的控制台状态

use serde::Serialize;

/// 单个文件的进度状态
///
/// 只由所属的上传引擎修改；两个计数器都单调不减且不超过文件大小
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressState {
    /// 文件总大小
    pub total_size: u64,
    /// 已确认上传的字节数
    pub bytes_uploaded: u64,
    /// 已计算哈希的字节数
    pub bytes_hashed: u64,
}

impl ProgressState {
    pub fn new(total_size: u64) -> Self {
        Self {
            total_size,
            bytes_uploaded: 0,
            bytes_hashed: 0,
        }
    }

    /// 推进已上传字节数（不会回退，不会超过文件大小）
    pub fn advance_uploaded(&mut self, bytes: u64) {
        self.bytes_uploaded = self
            .bytes_uploaded
            .saturating_add(bytes)
            .min(self.total_size);
    }

    /// 推进已哈希字节数
    pub fn advance_hashed(&mut self, bytes: u64) {
        self.bytes_hashed = self.bytes_hashed.saturating_add(bytes).min(self.total_size);
    }

    /// 取整后的百分比，限制在 [0, 100]；空文件视为 100
    ///
    /// 恰好 .5 时取偶数（12.5% → 12，13.5% → 14）
    pub fn percent(&self) -> u8 {
        if self.total_size == 0 {
            return 100;
        }
        let ratio = self.bytes_uploaded as f64 / self.total_size as f64 * 100.0;
        ratio.round_ties_even().clamp(0.0, 100.0) as u8
    }

    /// 所有字节都已确认上传
    pub fn is_complete(&self) -> bool {
        self.bytes_uploaded >= self.total_size
    }
}

/// 一次进度上报
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    /// 任务ID
    pub task_id: String,
    /// 本地文件名（用于展示）
    pub file_name: String,
    /// 百分比
    pub percent: u8,
    /// 原始进度状态
    pub state: ProgressState,
}

/// 进度接收方
///
/// 每个成功发送的分片之后调用一次；空文件只调用一次（100）
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, update: &ProgressUpdate);
}

/// 不展示进度
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _update: &ProgressUpdate) {}
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressUpdate) + Send + Sync,
{
    fn on_progress(&self, update: &ProgressUpdate) {
        self(update)
    }
}
