//! 控制台进度条
//!
//! 每个上传任务一条进度条，绘制在 stderr 上

use crate::uploader::{ProgressSink, ProgressUpdate};
use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {msg:20!} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// indicatif 实现的 ProgressSink
pub struct ConsoleProgress {
    multi: MultiProgress,
    bars: DashMap<String, ProgressBar>,
    style: ProgressStyle,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    /// 不输出任何内容（--json 模式和测试使用）
    pub fn hidden() -> Self {
        Self::with_draw_target(ProgressDrawTarget::hidden())
    }

    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        let style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");

        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: DashMap::new(),
            style,
        }
    }

    fn bar_for(&self, update: &ProgressUpdate) -> ProgressBar {
        self.bars
            .entry(update.task_id.clone())
            .or_insert_with(|| {
                let bar = self
                    .multi
                    .add(ProgressBar::new(update.state.total_size.max(1)));
                bar.set_style(self.style.clone());
                bar.set_message(update.file_name.clone());
                bar
            })
            .clone()
    }

    /// 当前进度条位置（字节）
    pub fn position(&self, task_id: &str) -> Option<u64> {
        self.bars.get(task_id).map(|bar| bar.position())
    }

    pub fn is_finished(&self, task_id: &str) -> bool {
        self.bars
            .get(task_id)
            .map(|bar| bar.is_finished())
            .unwrap_or(false)
    }

    /// 结束所有未完成的进度条（失败或取消的任务停在当前位置）
    pub fn finish_all(&self) {
        for bar in self.bars.iter() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, update: &ProgressUpdate) {
        let bar = self.bar_for(update);

        // 空文件没有字节可显示，直接填满
        if update.state.total_size == 0 {
            bar.set_position(1);
        } else {
            bar.set_position(update.state.bytes_uploaded);
        }

        // 百分比是取整后的值，99.5% 也会显示为 100，以字节数为准
        if update.state.is_complete() {
            bar.finish();
        }
    }
}
