//! 操作注册表
//!
//! 所有操作实现 Operation trait（id / namespace / 参数表 / invoke），由 OperationRegistry 按 id 注册与查找。
//! 注册表在启动时一次性构建，之后只读，以 Arc 在请求间共享。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::credentials::Credential;
use crate::core::ActionError;
use crate::dispatch::schema::{marshal_request, parameters_schema, Field, Params};

/// 动作结果：单个对象，或分页接口物化后的有序列表
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionOutput {
    Object(Value),
    List(Vec<Value>),
}

impl ActionOutput {
    pub fn to_json(&self) -> Value {
        match self {
            ActionOutput::Object(v) => v.clone(),
            ActionOutput::List(items) => Value::Array(items.clone()),
        }
    }
}

/// 可调度的操作：名称、所属 API 命名空间、所需凭证作用域、参数表与异步调用
#[async_trait]
pub trait Operation: Send + Sync {
    fn id(&self) -> &str;

    /// EXEC 事件中的 namespace / api 字段
    fn namespace(&self) -> &str;

    fn required_scope(&self) -> &str;

    fn description(&self) -> &str;

    fn fields(&self) -> &'static [Field];

    fn parameters_schema(&self) -> Value {
        parameters_schema(self.fields())
    }

    fn marshal(&self, args: &Map<String, Value>) -> Result<Params, ActionError> {
        marshal_request(self.fields(), args)
    }

    async fn invoke(&self, credential: &Credential, params: Params) -> Result<ActionOutput, ActionError>;
}

#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation: impl Operation + 'static) {
        let id = operation.id().to_string();
        self.operations.insert(id, Arc::new(operation));
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Operation>> {
        self.operations.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// 按字典序返回所有操作 id
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.operations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 操作清单（id、namespace、描述、参数 schema），供 /api/operations 展示
    pub fn to_schema_json(&self) -> Value {
        let listing: Vec<Value> = self
            .ids()
            .iter()
            .filter_map(|id| self.operations.get(id))
            .map(|op| {
                serde_json::json!({
                    "name": op.id(),
                    "namespace": op.namespace(),
                    "description": op.description(),
                    "parameters": op.parameters_schema(),
                })
            })
            .collect();
        Value::Array(listing)
    }
}
