// 认证模块数据类型定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 令牌提前过期的余量（秒）
const EXPIRY_MARGIN_SECS: i64 = 60;

/// 某个 remote 的访问凭证
///
/// 由令牌服务 `/token?remote=<name>` 返回，只在单次上传流程内有效
#[derive(Clone, Serialize, Deserialize)]
pub struct RemoteCredentials {
    /// Graph 访问令牌
    pub access_token: String,
    /// 刷新令牌（本程序不使用）
    #[serde(default)]
    pub refresh_token: String,
    /// 有效期（秒）
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// 网盘ID
    #[serde(default)]
    pub drive_id: String,
    /// 网盘类型（personal / business）
    #[serde(default)]
    pub drive_type: String,
    /// 下载地址前缀
    #[serde(default)]
    pub base_url: String,
    /// 上传根目录，所有上传路径都以它为前缀
    #[serde(default)]
    pub upload_root_path: String,
    /// 获取时间戳（本地填写）
    #[serde(skip, default = "now_timestamp")]
    pub fetched_at: i64,
}

fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

impl RemoteCredentials {
    /// 令牌过期时间戳
    pub fn expires_at(&self) -> i64 {
        self.fetched_at.saturating_add(self.expires_in)
    }

    /// 是否已过期（或即将过期）
    ///
    /// expires_in 为 0 表示服务端未提供有效期，视为不过期
    pub fn is_expired(&self) -> bool {
        if self.expires_in <= 0 {
            return false;
        }
        now_timestamp() + EXPIRY_MARGIN_SECS >= self.expires_at()
    }

    /// Authorization 头的值
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// 日志中只显示令牌前缀
fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return String::new();
    }
    let prefix: String = secret.chars().take(6).collect();
    format!("{}...", prefix)
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_in", &self.expires_in)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("drive_id", &self.drive_id)
            .field("drive_type", &self.drive_type)
            .field("base_url", &self.base_url)
            .field("upload_root_path", &self.upload_root_path)
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "access_token": "eyJ0eXAiOiJKV1QiLCJub25jZSI6",
            "refresh_token": "M.C5_BAY.0.U.-Cs1",
            "expires_in": 3599,
            "client_id": "a1b2c3",
            "client_secret": "s3cr3t-value",
            "drive_id": "b!xyz",
            "drive_type": "business",
            "base_url": "https://index.example.com/",
            "upload_root_path": "Public/uploads"
        }"#
    }

    #[test]
    fn test_parse_credentials() {
        let creds: RemoteCredentials = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(creds.drive_type, "business");
        assert_eq!(creds.upload_root_path, "Public/uploads");
        assert!(creds.fetched_at > 0);
        assert!(!creds.is_expired());
        assert!(creds.bearer().starts_with("Bearer eyJ0eX"));
    }

    #[test]
    fn test_minimal_credentials() {
        let creds: RemoteCredentials =
            serde_json::from_str(r#"{"access_token": "tok"}"#).unwrap();
        assert_eq!(creds.expires_in, 0);
        assert!(creds.base_url.is_empty());
        assert!(!creds.is_expired());
    }

    #[test]
    fn test_expired() {
        let mut creds: RemoteCredentials = serde_json::from_str(sample_json()).unwrap();
        creds.fetched_at -= 3599;
        assert!(creds.is_expired());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let creds: RemoteCredentials = serde_json::from_str(sample_json()).unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("eyJ0eXAiOiJKV1QiLCJub25jZSI6"));
        assert!(!debug.contains("s3cr3t-value"));
        assert!(debug.contains("eyJ0eX..."));
        assert!(debug.contains("Public/uploads"));
    }
}
