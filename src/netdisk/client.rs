// Graph 网盘客户端实现

use crate::auth::RemoteCredentials;
use crate::config::GraphConfig;
use crate::netdisk::{
    ChunkAck, ChunkUploader, ConflictBehavior, CreateUploadSessionRequest, DriveItem,
    SessionNegotiator, UploadSession,
};
use crate::uploader::{ChunkDescriptor, UploadError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_RANGE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Graph 客户端
///
/// 同时实现会话协商和分片发送，内部的 reqwest::Client 可以安全地在多个文件之间共享
#[derive(Debug, Clone)]
pub struct GraphClient {
    client: Client,
    api_base: String,
    conflict_behavior: ConflictBehavior,
}

impl GraphClient {
    /// 根据配置创建客户端
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(10));

        // 0 表示不限制单个请求的总耗时（大分片 + 慢网络）
        if config.request_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.request_timeout_secs));
        }

        let client = builder.build().context("Failed to create HTTP client")?;

        info!(
            "初始化 Graph 客户端成功, api_base={}, conflict_behavior={}",
            config.api_base,
            config.conflict_behavior.as_str()
        );

        Ok(Self::with_client(
            client,
            &config.api_base,
            config.conflict_behavior,
        ))
    }

    pub fn with_client(client: Client, api_base: &str, conflict_behavior: ConflictBehavior) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            conflict_behavior,
        }
    }

    /// createUploadSession 地址，路径逐段百分号编码
    pub fn session_endpoint(&self, remote_path: &str) -> String {
        let encoded = remote_path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        format!(
            "{}/me/drive/root:/{}:/createUploadSession",
            self.api_base, encoded
        )
    }
}

#[async_trait]
impl SessionNegotiator for GraphClient {
    async fn create_session(
        &self,
        credentials: &RemoteCredentials,
        remote_path: &str,
    ) -> Result<UploadSession, UploadError> {
        let url = self.session_endpoint(remote_path);
        info!("创建上传会话: path={}", remote_path);
        debug!("创建上传会话 URL: {}", url);

        let session_error = |status: Option<u16>, message: String| UploadError::Session {
            remote_path: remote_path.to_string(),
            status,
            message,
        };

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, credentials.bearer())
            .json(&CreateUploadSessionRequest::new(self.conflict_behavior))
            .send()
            .await
            .map_err(|e| session_error(None, format!("请求发送失败: {}", e)))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| session_error(Some(status.as_u16()), format!("读取响应失败: {}", e)))?;

        if !status.is_success() {
            error!(
                "创建上传会话失败: path={}, status={}, body={}",
                remote_path, status, response_text
            );
            return Err(session_error(
                Some(status.as_u16()),
                format!("status: {}, error: {}", status.as_u16(), response_text),
            ));
        }

        let session: UploadSession = serde_json::from_str(&response_text).map_err(|e| {
            session_error(Some(status.as_u16()), format!("解析会话响应失败: {}", e))
        })?;

        debug!(
            "上传会话创建成功: path={}, expiration={:?}",
            remote_path, session.expiration_date_time
        );

        Ok(session)
    }
}

#[async_trait]
impl ChunkUploader for GraphClient {
    async fn send(
        &self,
        session: &UploadSession,
        descriptor: &ChunkDescriptor,
        data: Vec<u8>,
    ) -> Result<ChunkAck, UploadError> {
        let content_range = descriptor.content_range();
        let content_length = data.len();

        debug!(
            "[分片#{}] 发送: {}, size={}",
            descriptor.index, content_range, content_length
        );

        let chunk_error = |status: Option<u16>, body: String| UploadError::ChunkUpload {
            content_range: content_range.clone(),
            status,
            body,
        };

        // 会话 URL 已预授权，不携带 Authorization 头
        let response = self
            .client
            .put(&session.upload_url)
            .header(CONTENT_RANGE, &content_range)
            .header(CONTENT_LENGTH, content_length)
            .body(data)
            .send()
            .await
            .map_err(|e| chunk_error(None, e.to_string()))?;

        let status = response.status();
        let response_text = match response.text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "[分片#{}] 读取响应失败: {}, status={}, error={}",
                    descriptor.index, content_range, status, e
                );
                format!("读取响应失败: {}", e)
            }
        };

        if !status.is_success() {
            return Err(chunk_error(Some(status.as_u16()), response_text));
        }

        // 最后一个分片返回 200/201 和文件信息，中间分片返回 202
        let item = if status.as_u16() == 200 || status.as_u16() == 201 {
            match serde_json::from_str::<DriveItem>(&response_text) {
                Ok(item) => Some(item),
                Err(e) => {
                    warn!("解析上传完成响应失败（忽略）: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(ChunkAck {
            status: status.as_u16(),
            item,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, Method, StatusCode, Uri};
    use axum::response::{IntoResponse, Response};
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct RecordedRequest {
        method: Method,
        path: String,
        authorization: Option<String>,
        content_range: Option<String>,
        content_length: Option<String>,
        body: Vec<u8>,
    }

    #[derive(Clone)]
    struct GraphServerState {
        base: Arc<Mutex<String>>,
        requests: Arc<Mutex<Vec<RecordedRequest>>>,
    }

    fn header(headers: &HeaderMap, name: &str) -> Option<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    async fn graph_handler(
        State(state): State<GraphServerState>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let path = uri.path().to_string();
        let content_range = header(&headers, "content-range");
        state.requests.lock().unwrap().push(RecordedRequest {
            method: method.clone(),
            path: path.clone(),
            authorization: header(&headers, "authorization"),
            content_range: content_range.clone(),
            content_length: header(&headers, "content-length"),
            body: body.to_vec(),
        });

        if method == Method::POST {
            if path.contains("denied") {
                return (StatusCode::UNAUTHORIZED, "InvalidAuthenticationToken").into_response();
            }
            let base = state.base.lock().unwrap().clone();
            return Json(serde_json::json!({
                "uploadUrl": format!("{}/upload/session-1", base),
                "expirationDateTime": "2030-01-01T00:00:00Z"
            }))
            .into_response();
        }

        if path.contains("broken") {
            return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
        }

        // bytes start-end/total
        let range = content_range.unwrap_or_default();
        let (span, total) = range
            .trim_start_matches("bytes ")
            .split_once('/')
            .unwrap_or(("0-0", "0"));
        let end: u64 = span.split('-').nth(1).unwrap_or("0").parse().unwrap_or(0);
        let total: u64 = total.parse().unwrap_or(0);

        if end + 1 == total {
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "id": "01ABC",
                    "name": "a.bin",
                    "size": total,
                    "file": {"hashes": {"quickXorHash": "server-hash"}}
                })),
            )
                .into_response()
        } else {
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({"nextExpectedRanges": [format!("{}-", end + 1)]})),
            )
                .into_response()
        }
    }

    async fn spawn_graph_server() -> (String, GraphServerState) {
        let state = GraphServerState {
            base: Arc::new(Mutex::new(String::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .fallback(graph_handler)
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        *state.base.lock().unwrap() = base.clone();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (base, state)
    }

    fn credentials() -> RemoteCredentials {
        serde_json::from_value(serde_json::json!({
            "access_token": "graph-token",
            "base_url": "https://index.example.com",
            "upload_root_path": "Public"
        }))
        .unwrap()
    }

    fn client(base: &str) -> GraphClient {
        GraphClient::new(&GraphConfig {
            api_base: format!("{}/v1.0/", base),
            ..GraphConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_session_endpoint_encoding() {
        let client = GraphClient::with_client(
            Client::new(),
            "https://graph.microsoft.com/v1.0/",
            ConflictBehavior::Rename,
        );
        assert_eq!(
            client.session_endpoint("Public//my docs/a+b.txt"),
            "https://graph.microsoft.com/v1.0/me/drive/root:/Public/my%20docs/a%2Bb.txt:/createUploadSession"
        );
    }

    #[tokio::test]
    async fn test_create_session() {
        let (base, state) = spawn_graph_server().await;
        let session = client(&base)
            .create_session(&credentials(), "Public/dir/my file.bin")
            .await
            .unwrap();

        assert_eq!(session.upload_url, format!("{}/upload/session-1", base));
        assert_eq!(
            session.expiration_date_time.as_deref(),
            Some("2030-01-01T00:00:00Z")
        );

        let requests = state.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.method, Method::POST);
        assert_eq!(
            request.path,
            "/v1.0/me/drive/root:/Public/dir/my%20file.bin:/createUploadSession"
        );
        assert_eq!(request.authorization.as_deref(), Some("Bearer graph-token"));

        let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"item": {"@microsoft.graph.conflictBehavior": "rename"}})
        );
    }

    #[tokio::test]
    async fn test_create_session_rejected() {
        let (base, _) = spawn_graph_server().await;
        let err = client(&base)
            .create_session(&credentials(), "Public/denied/a.bin")
            .await
            .unwrap_err();

        match err {
            UploadError::Session {
                remote_path,
                status,
                message,
            } => {
                assert_eq!(remote_path, "Public/denied/a.bin");
                assert_eq!(status, Some(401));
                assert!(message.contains("InvalidAuthenticationToken"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_chunks_with_range_headers() {
        let (base, state) = spawn_graph_server().await;
        let client = client(&base);
        let session = UploadSession::new(format!("{}/upload/session-1", base));

        let first = ChunkDescriptor::new(0, 0..5, 8);
        let ack = client.send(&session, &first, b"hello".to_vec()).await.unwrap();
        assert_eq!(ack.status, 202);
        assert!(ack.item.is_none());

        let last = ChunkDescriptor::new(1, 5..8, 8);
        let ack = client.send(&session, &last, b"abc".to_vec()).await.unwrap();
        assert_eq!(ack.status, 201);
        assert_eq!(
            ack.item.as_ref().and_then(|item| item.quick_xor_hash()),
            Some("server-hash")
        );

        let requests = state.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].method, Method::PUT);
        assert_eq!(requests[0].content_range.as_deref(), Some("bytes 0-4/8"));
        assert_eq!(requests[0].content_length.as_deref(), Some("5"));
        assert_eq!(requests[0].body, b"hello");
        assert_eq!(requests[1].content_range.as_deref(), Some("bytes 5-7/8"));
        assert_eq!(requests[1].content_length.as_deref(), Some("3"));
        // 会话 URL 预授权
        assert!(requests.iter().all(|r| r.authorization.is_none()));
    }

    #[tokio::test]
    async fn test_send_chunk_failure() {
        let (base, _) = spawn_graph_server().await;
        let session = UploadSession::new(format!("{}/upload/broken", base));
        let descriptor = ChunkDescriptor::new(0, 0..3, 3);

        let err = client(&base)
            .send(&session, &descriptor, b"abc".to_vec())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "上传分片失败 bytes 0-2/3, status: 500, error: boom"
        );
        assert!(err.is_retriable());
    }

    /// 只返回一半响应体就断开连接的服务端
    async fn spawn_truncated_server(status_line: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            // 读完请求头和请求体再应答
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let content_length = text[..head_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }
            let response = format!("{}\r\nContent-Length: 100\r\n\r\npartial", status_line);
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        base
    }

    #[tokio::test]
    async fn test_send_chunk_failure_with_unreadable_body() {
        let base = spawn_truncated_server("HTTP/1.1 500 Internal Server Error").await;
        let session = UploadSession::new(format!("{}/upload/s", base));
        let descriptor = ChunkDescriptor::new(0, 0..3, 3);

        let err = client(&base)
            .send(&session, &descriptor, b"abc".to_vec())
            .await
            .unwrap_err();

        match err {
            UploadError::ChunkUpload { status, body, .. } => {
                assert_eq!(status, Some(500));
                assert!(body.starts_with("读取响应失败"), "body: {}", body);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let session = UploadSession::new(format!("http://{}/upload/gone", addr));
        let descriptor = ChunkDescriptor::new(0, 0..3, 3);
        let err = client("http://127.0.0.1:9")
            .send(&session, &descriptor, b"abc".to_vec())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::ChunkUpload { status: None, .. }));
    }
}
