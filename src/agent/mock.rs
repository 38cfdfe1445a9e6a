//! Scripted 远程 Agent（用于测试，无需网络）
//!
//! 按顺序返回预置的原始响应（经 into_event 校验，因此未知事件同样走协议错误路径），
//! 并记录创建的会话数与每次交换收到的消息。脚本用完后可选地重复某个响应。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::client::AgentBackend;
use crate::agent::wire::{AgentEvent, AgentResponse};
use crate::core::RelayError;

#[derive(Debug, Default)]
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Result<AgentResponse, String>>>,
    repeat: Option<AgentResponse>,
    session_failure: Option<String>,
    sessions: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: AgentResponse) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(response));
        }
        self
    }

    pub fn exec(self, name: &str, arguments: Value) -> Self {
        self.respond(AgentResponse::exec(
            Some("stripe"),
            json!({"name": name, "arguments": arguments}),
        ))
    }

    pub fn stop(self, data: Value) -> Self {
        self.respond(AgentResponse::stop(data))
    }

    pub fn error(self, data: Value) -> Self {
        self.respond(AgentResponse::error(data))
    }

    /// 追加一次传输失败
    pub fn fail(self, reason: &str) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(reason.to_string()));
        }
        self
    }

    /// 脚本用完后一直返回该响应
    pub fn repeat(mut self, response: AgentResponse) -> Self {
        self.repeat = Some(response);
        self
    }

    pub fn fail_session(mut self, reason: &str) -> Self {
        self.session_failure = Some(reason.to_string());
        self
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// 依次发给 Agent 的消息
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AgentBackend for ScriptedAgent {
    async fn create_session(&self, user_id: &str) -> Result<String, RelayError> {
        if let Some(reason) = &self.session_failure {
            return Err(RelayError::Session(reason.clone()));
        }
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|e| RelayError::Session(e.to_string()))?;
        let id = format!("session-{}-{}", user_id, sessions.len() + 1);
        sessions.push(id.clone());
        Ok(id)
    }

    async fn exchange(
        &self,
        _user_id: &str,
        _session_id: &str,
        message: &str,
    ) -> Result<AgentEvent, RelayError> {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message.to_string());
        }
        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match next {
            Some(Ok(response)) => response.into_event(),
            Some(Err(reason)) => Err(RelayError::AgentTransport(reason)),
            None => match &self.repeat {
                Some(response) => response.clone().into_event(),
                None => Err(RelayError::AgentTransport(
                    "scripted agent exhausted".to_string(),
                )),
            },
        }
    }
}
