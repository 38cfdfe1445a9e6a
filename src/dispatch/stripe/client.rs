//! Stripe REST 客户端
//!
//! 请求体为 application/x-www-form-urlencoded（方括号嵌套），GET 以同样的键值对作为 query；
//! 认证用用户自己的 secret key（Bearer），凭证逐次传入，客户端本身不持有任何 Key。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::credentials::Credential;
use crate::core::ActionError;
use crate::dispatch::schema::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// 已编组、路径占位符已替换的单次 API 请求
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub params: Params,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StripeError {
    #[error("HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("pagination exceeded {0} pages")]
    PageLimit(usize),
}

impl From<StripeError> for ActionError {
    fn from(err: StripeError) -> Self {
        ActionError::UpstreamCallFailed(err.to_string())
    }
}

/// Stripe API 抽象：生产实现走 HTTP，测试用 RecordingStripeApi
#[async_trait]
pub trait StripeApi: Send + Sync {
    async fn send(&self, credential: &Credential, request: ApiRequest) -> Result<Value, StripeError>;
}

pub struct HttpStripeClient {
    http: reqwest::Client,
    base_url: String,
    api_version: Option<String>,
}

impl HttpStripeClient {
    pub fn new(
        base_url: &str,
        api_version: Option<String>,
        timeout: Duration,
    ) -> Result<Self, StripeError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StripeError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.filter(|v| !v.is_empty()),
        })
    }
}

#[async_trait]
impl StripeApi for HttpStripeClient {
    async fn send(&self, credential: &Credential, request: ApiRequest) -> Result<Value, StripeError> {
        let url = format!("{}{}", self.base_url, request.path);
        let pairs = request.params.to_form_pairs();

        let mut builder = match request.method {
            HttpMethod::Get => self.http.get(&url).query(&pairs),
            HttpMethod::Post => self.http.post(&url).form(&pairs),
        };
        builder = builder.bearer_auth(credential.secret());
        if let Some(version) = &self.api_version {
            builder = builder.header("Stripe-Version", version);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| StripeError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StripeError::Transport(e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or_else(|| body.trim().to_string());
            return Err(StripeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&body).map_err(|e| StripeError::Decode(e.to_string()))
    }
}
