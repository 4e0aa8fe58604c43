// 配置管理模块

use crate::netdisk::ConflictBehavior;
use crate::uploader::{
    chunk_size_from_mb, validate_chunk_size_mb, DEFAULT_CHUNK_SIZE_MB,
    DEFAULT_MAX_CONCURRENT_TASKS,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// 可用的 remote 标识
    #[serde(default = "default_remotes")]
    pub remotes: Vec<String>,
    /// 令牌服务配置
    #[serde(default)]
    pub token: TokenConfig,
    /// Graph 接口配置
    #[serde(default)]
    pub graph: GraphConfig,
    /// 上传配置
    #[serde(default)]
    pub upload: UploadConfig,
    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

fn default_remotes() -> Vec<String> {
    ["hakimionedrive", "saurajcf", "oned"]
        .iter()
        .map(|r| r.to_string())
        .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remotes: default_remotes(),
            token: TokenConfig::default(),
            graph: GraphConfig::default(),
            upload: UploadConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// 令牌服务配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenConfig {
    /// 令牌服务地址（请求 `{base_url}/token?remote=`）
    #[serde(default = "default_token_base_url")]
    pub base_url: String,
    /// 请求超时（秒）
    #[serde(default = "default_token_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_token_base_url() -> String {
    "https://project.ksauraj.eu.org".to_string()
}

fn default_token_timeout_secs() -> u64 {
    30
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            base_url: default_token_base_url(),
            timeout_secs: default_token_timeout_secs(),
        }
    }
}

/// Graph 接口配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphConfig {
    /// API 根地址
    #[serde(default = "default_graph_api_base")]
    pub api_base: String,
    /// 同名文件冲突处理策略
    #[serde(default)]
    pub conflict_behavior: ConflictBehavior,
    /// 连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 单个请求超时（秒，0 表示不限制）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_graph_api_base() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            api_base: default_graph_api_base(),
            conflict_behavior: ConflictBehavior::default(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// 上传配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadConfig {
    /// 分片大小 (MB)，范围 1-60MB
    pub chunk_size_mb: u64,
    /// 最大同时上传文件数
    pub max_concurrent_tasks: usize,
    /// 可重试分片错误的最大重试次数（0 = 不重试）
    pub max_retries: u32,
    /// 上传时计算 QuickXor 摘要
    pub compute_hash: bool,
    /// 同一 remote 的文件共享一次令牌请求
    pub share_credentials: bool,
    /// 上传文件夹时是否跳过隐藏文件（以.开头的文件/文件夹）
    pub skip_hidden_files: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_mb: DEFAULT_CHUNK_SIZE_MB,
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            max_retries: 0,
            compute_hash: true,
            share_credentials: false,
            skip_hidden_files: false,
        }
    }
}

impl UploadConfig {
    /// 分片大小（字节）
    pub fn chunk_size_bytes(&self) -> u64 {
        chunk_size_from_mb(self.chunk_size_mb)
    }

    pub fn validate(&self) -> Result<()> {
        validate_chunk_size_mb(self.chunk_size_mb).map_err(|e| anyhow::anyhow!(e))?;
        if self.max_concurrent_tasks == 0 {
            anyhow::bail!("max_concurrent_tasks 必须大于 0");
        }
        Ok(())
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志保留天数（默认 7 天）
    #[serde(default = "default_log_retention_days")]
    pub retention_days: u32,
    /// 日志级别（默认 warn，避免干扰进度条）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 单个日志文件最大大小（字节，默认 50MB）
    #[serde(default = "default_log_max_file_size")]
    pub max_file_size: u64,
}

fn default_log_enabled() -> bool {
    false
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_retention_days() -> u32 {
    7
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_log_max_file_size() -> u64 {
    50 * 1024 * 1024 // 50MB
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            retention_days: default_log_retention_days(),
            level: default_log_level(),
            max_file_size: default_log_max_file_size(),
        }
    }
}

impl AppConfig {
    /// 是否为已配置的 remote
    pub fn is_known_remote(&self, remote: &str) -> bool {
        self.remotes.iter().any(|r| r == remote)
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> Result<()> {
        if self.remotes.is_empty() {
            anyhow::bail!("至少需要配置一个 remote");
        }
        self.upload.validate().context("上传配置无效")?;
        Ok(())
    }

    /// 从文件加载配置
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .await
            .context("Failed to read config file")?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;
        config.validate().context("配置文件验证失败")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.validate().context("保存配置失败")?;

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("配置已保存: {}", path.display());
        Ok(())
    }

    /// 加载配置，失败时使用默认配置
    ///
    /// 配置文件不存在时写出一份默认配置；文件存在但无法解析时不覆盖
    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path.display());
                config
            }
            Err(e) => {
                let default_config = Self::default();

                if path.exists() {
                    tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                } else if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {}", e);
                }

                default_config
            }
        }
    }
}
