//! 记录型 Stripe 桩（用于测试，无需网络）
//!
//! 按路径排队预置响应；未预置的路径回显请求（path + params）。所有请求连同所用 secret 被记录下来。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::credentials::Credential;
use crate::dispatch::stripe::client::{ApiRequest, StripeApi, StripeError};

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub secret: String,
    pub request: ApiRequest,
}

#[derive(Debug, Default)]
pub struct RecordingStripeApi {
    scripted: Mutex<HashMap<String, VecDeque<Result<Value, StripeError>>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl RecordingStripeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, path: &str, value: Value) -> Self {
        self.push(path, Ok(value));
        self
    }

    pub fn with_error(self, path: &str, err: StripeError) -> Self {
        self.push(path, Err(err));
        self
    }

    fn push(&self, path: &str, reply: Result<Value, StripeError>) {
        if let Ok(mut scripted) = self.scripted.lock() {
            scripted.entry(path.to_string()).or_default().push_back(reply);
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StripeApi for RecordingStripeApi {
    async fn send(&self, credential: &Credential, request: ApiRequest) -> Result<Value, StripeError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                secret: credential.secret().to_string(),
                request: request.clone(),
            });
        }
        let scripted = self
            .scripted
            .lock()
            .ok()
            .and_then(|mut s| s.get_mut(&request.path).and_then(VecDeque::pop_front));
        match scripted {
            Some(reply) => reply,
            None => Ok(json!({
                "object": "echo",
                "path": request.path,
                "params": request.params.to_json(),
            })),
        }
    }
}
