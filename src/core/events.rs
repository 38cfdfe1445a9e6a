//! 流式进度事件
//!
//! 线上格式 `{"type": "start"|"progress"|"complete"|"error", "data": {...}}`；
//! 一条流恰好以一个 start 开头，以一个 complete 或 error 结尾。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    Start,
    Progress,
    Complete,
    Error,
}

impl ProgressKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressKind::Complete | ProgressKind::Error)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: ProgressKind,
    pub data: Map<String, Value>,
}

impl ProgressEvent {
    /// data 不是对象时包装为 `{"value": data}`
    pub fn new(kind: ProgressKind, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Self { kind, data }
    }

    pub fn message(&self) -> Option<&str> {
        self.data.get("message").and_then(Value::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
