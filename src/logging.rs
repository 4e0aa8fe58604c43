//! 日志系统配置
//!
//! 控制台日志输出到 stderr（stdout 留给结果输出，进度条也在 stderr 上刷新）；
//! 可选的日志文件按大小滚动，启动时清理过期文件

use crate::config::LogConfig;
use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, time::ChronoLocal},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// 日志文件名前缀
pub const LOG_FILE_PREFIX: &str = "ksau-rust.";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// 按大小滚动的日志文件
///
/// 文件名：`ksau-rust.<启动时间>.log`，滚动后为 `ksau-rust.<启动时间>_<序号>.log`
struct RollingFile {
    start_timestamp: String,
    log_dir: PathBuf,
    current_file: Option<File>,
    current_index: u32,
    max_file_size: u64,
    current_size: u64,
}

impl RollingFile {
    fn open(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        let mut file = Self {
            start_timestamp: Local::now().format("%Y-%m-%d-%H%M%S").to_string(),
            log_dir,
            current_file: None,
            current_index: 0,
            max_file_size,
            current_size: 0,
        };
        file.open_current()?;
        Ok(file)
    }

    fn file_path(&self, index: u32) -> PathBuf {
        let filename = if index == 0 {
            format!("{}{}.log", LOG_FILE_PREFIX, self.start_timestamp)
        } else {
            format!("{}{}_{}.log", LOG_FILE_PREFIX, self.start_timestamp, index)
        };
        self.log_dir.join(filename)
    }

    fn open_current(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_path(self.current_index))?;
        self.current_size = file.metadata().map(|m| m.len()).unwrap_or(0);
        self.current_file = Some(file);
        Ok(())
    }

    fn write_data(&mut self, buf: &[u8]) -> io::Result<usize> {
        // 空文件不滚动，单条超长日志也要写进去
        if self.current_size > 0 && self.current_size + buf.len() as u64 > self.max_file_size {
            if let Some(mut file) = self.current_file.take() {
                file.flush()?;
            }
            self.current_index += 1;
            self.open_current()?;
        }

        let file = self
            .current_file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "日志文件未打开"))?;
        let written = file.write(buf)?;
        self.current_size += written as u64;
        Ok(written)
    }

    fn flush_file(&mut self) -> io::Result<()> {
        match self.current_file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// 日志文件写入器（可克隆，内部共享同一个滚动文件）
#[derive(Clone)]
pub struct LogFileManager {
    inner: Arc<Mutex<RollingFile>>,
}

impl LogFileManager {
    pub fn new(log_dir: PathBuf, max_file_size: u64) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingFile::open(log_dir, max_file_size)?)),
        })
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut RollingFile) -> io::Result<T>) -> io::Result<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "日志文件锁已损坏"))?;
        f(&mut inner)
    }
}

impl Write for LogFileManager {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_inner(|inner| inner.write_data(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_inner(|inner| inner.flush_file())
    }
}

/// 日志系统守卫
/// 必须保持存活，否则日志写入线程会终止
pub struct LogGuard {
    _file_guard: Option<WorkerGuard>,
}

/// 初始化日志系统
///
/// `RUST_LOG` 优先于配置中的日志级别；文件日志初始化失败时回退到仅控制台输出
pub fn init_logging(config: &LogConfig) -> LogGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_writer(io::stderr)
        .with_ansi(true);

    let file_writer = if config.enabled {
        match open_log_file(config) {
            Ok(writer) => Some(writer),
            Err(e) => {
                eprintln!("{:#}，回退到仅控制台输出", e);
                None
            }
        }
    } else {
        None
    };

    let Some(file_manager) = file_writer else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        return LogGuard { _file_guard: None };
    };

    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_manager);
    let file_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_timer(ChronoLocal::new(TIMESTAMP_FORMAT.to_string()))
        .with_ansi(false)
        .with_writer(non_blocking);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(
        "日志系统初始化完成: 目录={:?}, 保留天数={}, 级别={}, 单文件最大={:.1}MB",
        config.log_dir,
        config.retention_days,
        config.level,
        config.max_file_size as f64 / 1024.0 / 1024.0
    );

    let deleted = cleanup_old_logs(&config.log_dir, config.retention_days, Local::now().date_naive());
    if deleted > 0 {
        info!("已清理 {} 个过期日志文件", deleted);
    }

    LogGuard {
        _file_guard: Some(file_guard),
    }
}

fn open_log_file(config: &LogConfig) -> Result<LogFileManager> {
    fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("创建日志目录失败: {:?}", config.log_dir))?;
    LogFileManager::new(config.log_dir.clone(), config.max_file_size)
        .context("创建日志文件失败")
}

/// 清理过期日志文件，返回删除的数量
///
/// 优先使用文件名中的日期，无法解析时使用修改时间
fn cleanup_old_logs(log_dir: &Path, retention_days: u32, today: NaiveDate) -> usize {
    let retention = chrono::Duration::days(retention_days as i64);

    let entries = match fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("读取日志目录失败: {:?}, 错误: {}", log_dir, e);
            return 0;
        }
    };

    let mut deleted_count = 0;

    for entry in entries.flatten() {
        let path = entry.path();
        let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if !path.is_file() || !filename.starts_with(LOG_FILE_PREFIX) || !filename.ends_with(".log")
        {
            continue;
        }

        let expired = match extract_date_from_filename(filename) {
            Some(file_date) => today.signed_duration_since(file_date) > retention,
            None => expired_by_modified_time(&entry, retention),
        };

        if !expired {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                deleted_count += 1;
                tracing::debug!("已删除过期日志文件: {:?}", path);
            }
            Err(e) => tracing::warn!("删除过期日志文件失败: {:?}, 错误: {}", path, e),
        }
    }

    deleted_count
}

/// 从 `ksau-rust.YYYY-MM-DD[-HHMMSS[_N]].log` 中取出日期
fn extract_date_from_filename(filename: &str) -> Option<NaiveDate> {
    let name = filename
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(".log")?;
    let date = name.get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

fn expired_by_modified_time(entry: &fs::DirEntry, retention: chrono::Duration) -> bool {
    entry
        .metadata()
        .and_then(|m| m.modified())
        .map(|modified| {
            let modified: chrono::DateTime<chrono::Utc> = modified.into();
            chrono::Utc::now().signed_duration_since(modified) > retention
        })
        .unwrap_or(false)
}
