//! 远程 Agent HTTP 客户端
//!
//! 会话创建与消息交换均无重试：任何传输、状态码或解码失败都直接返回 RelayError。

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Url;

use crate::agent::wire::{AgentEvent, AgentResponse, ProcessRequest, SessionResponse};
use crate::core::RelayError;

/// 远程 Agent 抽象：生产实现走 HTTP，测试用 ScriptedAgent
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn create_session(&self, user_id: &str) -> Result<String, RelayError>;

    async fn exchange(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<AgentEvent, RelayError>;
}

pub struct HttpAgentBackend {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpAgentBackend {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base_url = Url::parse(base_url).with_context(|| format!("invalid agent base_url: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("agent base_url cannot be a base: {base_url}");
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build agent http client")?;
        Ok(Self { http, base_url })
    }

    /// 拼接路径段（逐段百分号编码）
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn create_session(&self, user_id: &str) -> Result<String, RelayError> {
        let url = self.endpoint(&["session", user_id]);
        let response = self
            .http
            .post(url)
            .send()
            .await
            .map_err(|e| RelayError::Session(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::Session(format!("HTTP {}: {}", status.as_u16(), body.trim())));
        }

        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Session(format!("invalid session response: {e}")))?;
        if session.session_id.is_empty() {
            return Err(RelayError::Session("empty session id".to_string()));
        }
        tracing::debug!(user_id = %user_id, session_id = %session.session_id, "session created");
        Ok(session.session_id)
    }

    async fn exchange(
        &self,
        user_id: &str,
        session_id: &str,
        message: &str,
    ) -> Result<AgentEvent, RelayError> {
        let url = self.endpoint(&["process", user_id, session_id]);
        let response = self
            .http
            .post(url)
            .json(&ProcessRequest { message })
            .send()
            .await
            .map_err(|e| RelayError::AgentTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::AgentTransport(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| RelayError::AgentTransport(e.to_string()))?;
        let decoded: AgentResponse =
            serde_json::from_str(&body).map_err(|e| RelayError::AgentDecode(e.to_string()))?;
        decoded.into_event()
    }
}

#[cfg(all(test, feature = "web"))]
mod tests {
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;

    async fn spawn_stub() -> String {
        let app = Router::new()
            .route(
                "/session/:user",
                post(|Path(user): Path<String>| async move {
                    match user.as_str() {
                        "down" => (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"detail": "down"}))),
                        "empty" => (StatusCode::OK, Json(json!({"session_id": ""}))),
                        _ => (StatusCode::OK, Json(json!({"session_id": format!("sess-{user}")}))),
                    }
                }),
            )
            .route(
                "/process/:user/:session",
                post(
                    |Path((user, session)): Path<(String, String)>, Json(body): Json<Value>| async move {
                        if user == "garbled" {
                            return "not json".into_response();
                        }
                        let message = body["message"].as_str().unwrap_or_default().to_string();
                        let reply = match message.as_str() {
                            "weird" => json!({"event": "PING", "data": {}}),
                            "run" => json!({
                                "event": "EXEC",
                                "api": "stripe",
                                "data": {"name": "stripe_get_balance", "arguments": {}}
                            }),
                            _ => json!({
                                "event": "STOP",
                                "data": {"user": user, "session": session, "echo": message}
                            }),
                        };
                        Json(reply).into_response()
                    },
                ),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_session_and_exchange() {
        let base = spawn_stub().await;
        let backend = HttpAgentBackend::new(&base, Duration::from_secs(5)).unwrap();

        let session = backend.create_session("u1").await.unwrap();
        assert_eq!(session, "sess-u1");

        let stop = backend.exchange("u1", &session, "hello").await.unwrap();
        assert_eq!(
            stop,
            AgentEvent::Stop {
                data: json!({"user": "u1", "session": "sess-u1", "echo": "hello"})
            }
        );

        let exec = backend.exchange("u1", &session, "run").await.unwrap();
        assert!(matches!(exec, AgentEvent::Exec { namespace: Some(ns), .. } if ns == "stripe"));
    }

    #[tokio::test]
    async fn test_user_id_is_percent_encoded() {
        let base = spawn_stub().await;
        let backend = HttpAgentBackend::new(&base, Duration::from_secs(5)).unwrap();
        let session = backend.create_session("a b/c").await.unwrap();
        assert_eq!(session, "sess-a b/c");
    }

    #[tokio::test]
    async fn test_session_failures() {
        let base = spawn_stub().await;
        let backend = HttpAgentBackend::new(&base, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            backend.create_session("down").await,
            Err(RelayError::Session(m)) if m.starts_with("HTTP 503")
        ));
        assert!(matches!(
            backend.create_session("empty").await,
            Err(RelayError::Session(_))
        ));
    }

    #[tokio::test]
    async fn test_protocol_and_decode_errors() {
        let base = spawn_stub().await;
        let backend = HttpAgentBackend::new(&base, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            backend.exchange("u1", "s1", "weird").await,
            Err(RelayError::UnknownEvent(kind)) if kind == "PING"
        ));
        assert!(matches!(
            backend.exchange("garbled", "s1", "hi").await,
            Err(RelayError::AgentDecode(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_transport_error() {
        let backend = HttpAgentBackend::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        assert!(matches!(
            backend.create_session("u1").await,
            Err(RelayError::Session(_))
        ));
    }
}
