//! 动作执行器
//!
//! execute(user_id, namespace, action)：查表解析操作 → 按用户解析凭证并校验作用域 → 编组参数 →
//! 在超时内调用；四类失败统一为 ActionError。每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::credentials::CredentialStore;
use crate::core::ActionError;
use crate::dispatch::registry::{ActionOutput, OperationRegistry};

/// 由 EXEC 载荷 `{name, arguments}` 得到的动作请求
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub operation_id: String,
    pub arguments: Map<String, Value>,
}

impl ActionRequest {
    pub fn new(operation_id: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            operation_id: operation_id.into(),
            arguments,
        }
    }

    /// 解析 EXEC 载荷；形状错误属于单个动作的错误，不终止对话
    ///
    /// arguments 缺省或为 null 时视为空对象；为 JSON 字符串时尝试按对象解析。
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, ActionError> {
        let operation_id = match payload.get("name") {
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
            _ => {
                return Err(ActionError::ArgumentShapeInvalid(
                    "exec payload has no function name".to_string(),
                ))
            }
        };

        let arguments = match payload.get("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(args)) => args.clone(),
            Some(Value::String(raw)) => match serde_json::from_str::<Value>(raw) {
                Ok(Value::Object(args)) => args,
                _ => {
                    return Err(ActionError::ArgumentShapeInvalid(format!(
                        "arguments for '{operation_id}' must be an object"
                    )))
                }
            },
            Some(_) => {
                return Err(ActionError::ArgumentShapeInvalid(format!(
                    "arguments for '{operation_id}' must be an object"
                )))
            }
        };

        Ok(Self {
            operation_id,
            arguments,
        })
    }
}

pub struct ActionExecutor {
    registry: Arc<OperationRegistry>,
    credentials: Arc<CredentialStore>,
    timeout: Duration,
}

impl ActionExecutor {
    pub fn new(
        registry: Arc<OperationRegistry>,
        credentials: Arc<CredentialStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            credentials,
            timeout,
        }
    }

    pub fn registry(&self) -> &OperationRegistry {
        &self.registry
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// 执行单个动作；输出 JSON 审计日志
    pub async fn execute(
        &self,
        user_id: &str,
        namespace: Option<&str>,
        action: &ActionRequest,
    ) -> Result<ActionOutput, ActionError> {
        let start = Instant::now();
        let result = self.dispatch(user_id, namespace, action).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ActionError::UnknownOperation(_)) => "unknown_operation",
            Err(ActionError::CredentialResolutionFailed(_)) => "credential",
            Err(ActionError::ArgumentShapeInvalid(_)) => "invalid_arguments",
            Err(ActionError::UpstreamCallFailed(_)) => "upstream",
        };
        let audit = serde_json::json!({
            "event": "action_audit",
            "operation": action.operation_id,
            "namespace": namespace,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&action.arguments),
        });
        tracing::info!(audit = %audit.to_string(), "action");

        result
    }

    async fn dispatch(
        &self,
        user_id: &str,
        namespace: Option<&str>,
        action: &ActionRequest,
    ) -> Result<ActionOutput, ActionError> {
        let operation = self
            .registry
            .get(&action.operation_id)
            .ok_or_else(|| ActionError::UnknownOperation(action.operation_id.clone()))?;

        if let Some(ns) = namespace.filter(|ns| !ns.is_empty()) {
            if ns != operation.namespace() {
                return Err(ActionError::UnknownOperation(format!(
                    "{} (namespace {ns})",
                    action.operation_id
                )));
            }
        }

        let credential = self
            .credentials
            .get(user_id)
            .await
            .map_err(|e| ActionError::CredentialResolutionFailed(e.to_string()))?;
        if credential.scope() != operation.required_scope() {
            return Err(ActionError::CredentialResolutionFailed(format!(
                "credential scope '{}' does not grant '{}'",
                credential.scope(),
                operation.required_scope()
            )));
        }

        let params = operation.marshal(&action.arguments)?;

        match timeout(self.timeout, operation.invoke(&credential, params)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::UpstreamCallFailed(format!(
                "'{}' timed out after {}s",
                action.operation_id,
                self.timeout.as_secs()
            ))),
        }
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
