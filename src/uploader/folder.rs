//! 本地路径展开
//!
//! 批量上传的参数可以是文件或文件夹：
//! - 文件直接上传到远程目录
//! - 文件夹递归展开，远程路径保留 `文件夹名/相对目录` 结构

use crate::uploader::{join_remote_path, BatchEntry};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// 扫描到的文件
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// 本地文件路径
    pub local_path: PathBuf,
    /// 相对于扫描根目录的路径
    pub relative_path: PathBuf,
    /// 文件大小（字节）
    pub size: u64,
}

impl ScannedFile {
    /// 相对路径中的目录部分，统一为 `/` 分隔
    pub fn relative_dir(&self) -> String {
        let parts: Vec<String> = self
            .relative_path
            .parent()
            .map(|parent| {
                parent
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        join_remote_path(&parts.iter().map(String::as_str).collect::<Vec<_>>())
    }
}

/// 扫描选项
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// 跳过以 `.` 开头的文件和文件夹
    pub skip_hidden: bool,
}

/// 文件夹扫描器
#[derive(Debug, Clone, Default)]
pub struct FolderScanner {
    options: ScanOptions,
}

impl FolderScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ScanOptions) -> Self {
        Self { options }
    }

    /// 递归列出文件夹下的所有常规文件，按相对路径排序
    pub fn scan<P: AsRef<Path>>(&self, root_path: P) -> Result<Vec<ScannedFile>> {
        let root_path = root_path.as_ref();

        if !root_path.exists() {
            anyhow::bail!("扫描路径不存在: {}", root_path.display());
        }
        if !root_path.is_dir() {
            anyhow::bail!("扫描路径不是文件夹: {}", root_path.display());
        }

        let mut files = Vec::new();
        let mut pending = vec![root_path.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = std::fs::read_dir(&dir)
                .with_context(|| format!("读取目录失败: {}", dir.display()))?;

            for entry in entries {
                let entry = entry.with_context(|| format!("读取目录条目失败: {}", dir.display()))?;
                let path = entry.path();

                if self.options.skip_hidden && is_hidden(&path) {
                    debug!("跳过隐藏文件: {}", path.display());
                    continue;
                }

                // 不跟随符号链接，链接本身按非常规文件跳过
                let metadata = std::fs::symlink_metadata(&path)
                    .with_context(|| format!("读取文件元数据失败: {}", path.display()))?;

                if metadata.is_dir() {
                    pending.push(path);
                } else if metadata.is_file() {
                    let relative_path = path
                        .strip_prefix(root_path)
                        .with_context(|| format!("计算相对路径失败: {}", path.display()))?
                        .to_path_buf();
                    files.push(ScannedFile {
                        local_path: path,
                        relative_path,
                        size: metadata.len(),
                    });
                } else {
                    debug!("跳过非常规文件: {}", path.display());
                }
            }
        }

        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        info!(
            "文件夹扫描完成: {}, {} 个文件，总大小 {}",
            root_path.display(),
            files.len(),
            format_bytes(files.iter().map(|f| f.size).sum())
        );

        Ok(files)
    }

    /// 把命令行参数展开成批量上传条目（保持参数顺序）
    ///
    /// 文件夹的条目带上 `文件夹名/相对目录` 作为远程子目录
    pub fn collect_entries(&self, paths: &[PathBuf]) -> Result<Vec<BatchEntry>> {
        let mut entries = Vec::new();

        for path in paths {
            let canonical = dunce::canonicalize(path)
                .with_context(|| format!("路径不存在: {}", path.display()))?;

            if canonical.is_file() {
                entries.push(BatchEntry::new(canonical, ""));
                continue;
            }

            let folder_name = canonical
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            let scanned = self.scan(&canonical)?;
            if scanned.is_empty() {
                anyhow::bail!("文件夹为空或无可上传文件: {}", path.display());
            }

            for file in scanned {
                let relative_dir = join_remote_path(&[&folder_name, &file.relative_dir()]);
                entries.push(BatchEntry::new(file.local_path, relative_dir));
            }
        }

        Ok(entries)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// 格式化字节大小
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
