// 访问令牌获取
//
// 令牌服务：GET {base_url}/token?remote=<name>
// 非 2xx 响应一律视为认证失败，不重试

use crate::auth::RemoteCredentials;
use crate::config::TokenConfig;
use crate::uploader::UploadError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 令牌提供方
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// 获取指定 remote 的凭证
    async fn fetch_credentials(&self, remote: &str) -> Result<RemoteCredentials, UploadError>;
}

/// 通过令牌服务获取凭证
#[derive(Debug, Clone)]
pub struct KsauTokenProvider {
    client: Client,
    base_url: String,
}

impl KsauTokenProvider {
    pub fn new(config: &TokenConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(client, &config.base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}/token", self.base_url)
    }
}

#[async_trait]
impl TokenProvider for KsauTokenProvider {
    async fn fetch_credentials(&self, remote: &str) -> Result<RemoteCredentials, UploadError> {
        let url = self.token_url();
        info!("获取访问令牌: remote={}", remote);

        let auth_error = |status: Option<u16>, message: String| UploadError::Auth {
            remote: remote.to_string(),
            status,
            message,
        };

        let response = self
            .client
            .get(&url)
            .query(&[("remote", remote)])
            .send()
            .await
            .map_err(|e| auth_error(None, format!("请求令牌服务失败: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("读取响应失败: {}", e));
            warn!(
                "令牌服务返回错误: remote={}, status={}, body={}",
                remote, status, body
            );
            return Err(auth_error(
                Some(status.as_u16()),
                format!("status: {}, error: {}", status.as_u16(), body),
            ));
        }

        let credentials: RemoteCredentials = response
            .json()
            .await
            .map_err(|e| auth_error(Some(status.as_u16()), format!("解析令牌响应失败: {}", e)))?;

        debug!("令牌获取成功: remote={}, credentials={:?}", remote, credentials);
        Ok(credentials)
    }
}

/// 按 remote 缓存凭证，同一 remote 的多个文件共享一次令牌请求
///
/// 每个 remote 一把锁，不同 remote 的请求互不阻塞；令牌过期后重新获取；失败结果不缓存
pub struct CachedTokenProvider {
    inner: Arc<dyn TokenProvider>,
    cache: DashMap<String, Arc<Mutex<Option<RemoteCredentials>>>>,
}

impl CachedTokenProvider {
    pub fn new(inner: Arc<dyn TokenProvider>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// 清空缓存
    pub fn invalidate(&self) {
        self.cache.clear();
    }
}

#[async_trait]
impl TokenProvider for CachedTokenProvider {
    async fn fetch_credentials(&self, remote: &str) -> Result<RemoteCredentials, UploadError> {
        let slot = self.cache.entry(remote.to_string()).or_default().clone();

        // 持有该 remote 的锁请求，并发文件不会重复获取同一 remote 的令牌
        let mut cached = slot.lock().await;

        if let Some(credentials) = cached.as_ref() {
            if !credentials.is_expired() {
                debug!("使用缓存的令牌: remote={}", remote);
                return Ok(credentials.clone());
            }
            info!("缓存的令牌已过期，重新获取: remote={}", remote);
        }

        let credentials = self.inner.fetch_credentials(remote).await?;
        *cached = Some(credentials.clone());
        Ok(credentials)
    }
}
