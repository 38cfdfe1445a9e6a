//! 远程 Agent 协议类型
//!
//! 会话：`POST /session/{user}` → `{session_id}`；
//! 交换：`POST /process/{user}/{session}` + `{message}` → `{event, namespace|api, data}`。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::RelayError;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    #[serde(alias = "sessionID", alias = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessRequest<'a> {
    pub message: &'a str,
}

/// 原始响应（event 尚未校验）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub event: String,
    #[serde(default, alias = "api", skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// 已校验的 Agent 事件
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Exec {
        namespace: Option<String>,
        payload: Map<String, Value>,
    },
    Stop {
        data: Value,
    },
    Error {
        data: Value,
    },
}

impl AgentResponse {
    pub fn exec(namespace: Option<&str>, payload: Value) -> Self {
        Self {
            event: "EXEC".to_string(),
            namespace: namespace.map(String::from),
            data: payload,
        }
    }

    pub fn stop(data: Value) -> Self {
        Self {
            event: "STOP".to_string(),
            namespace: None,
            data,
        }
    }

    pub fn error(data: Value) -> Self {
        Self {
            event: "ERROR".to_string(),
            namespace: None,
            data,
        }
    }

    /// EXEC / STOP / ERROR 之外的事件类型是协议违规
    pub fn into_event(self) -> Result<AgentEvent, RelayError> {
        match self.event.as_str() {
            "EXEC" => {
                let payload = match self.data {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                let namespace = self.namespace.or_else(|| {
                    payload
                        .get("api")
                        .or_else(|| payload.get("namespace"))
                        .and_then(Value::as_str)
                        .map(String::from)
                });
                Ok(AgentEvent::Exec { namespace, payload })
            }
            "STOP" => Ok(AgentEvent::Stop { data: self.data }),
            "ERROR" => Ok(AgentEvent::Error { data: self.data }),
            other => Err(RelayError::UnknownEvent(other.to_string())),
        }
    }
}

/// ERROR 事件的用户可读描述：data.message，其次 data.error，否则整个 data 的 JSON
pub fn describe_error(data: &Value) -> String {
    if let Some(s) = data.as_str() {
        return s.to_string();
    }
    data.get("message")
        .and_then(Value::as_str)
        .or_else(|| data.get("error").and_then(Value::as_str))
        .map(String::from)
        .unwrap_or_else(|| data.to_string())
}
