//! 编排循环
//!
//! 分类 → （不需要动作则直接返回）→ 创建会话 → 与远程 Agent 反复交换：
//! - EXEC：执行动作，成功 / 失败文本都作为下一条消息发回 Agent，循环继续
//! - STOP：根据动作日志生成摘要，结束
//! - ERROR：以 Agent 给出的错误结束，不生成摘要
//! - 其它事件：协议错误
//!
//! 每次交换前检查取消令牌与轮数上限；单次请求内严格串行。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::agent::{describe_error, AgentBackend, AgentEvent};
use crate::classifier::ClassifierGate;
use crate::core::state::{ConversationTurn, LoopPhase};
use crate::core::stream::ProgressEmitter;
use crate::core::RelayError;
use crate::dispatch::{ActionExecutor, ActionRequest};

/// 入站请求 `{user_id, message}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(alias = "userId", alias = "userID")]
    pub user_id: String,
    pub message: String,
}

impl TurnRequest {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
        }
    }

    pub fn validate(&self) -> Result<(), RelayError> {
        if self.user_id.trim().is_empty() {
            return Err(RelayError::InvalidRequest("user_id is required".to_string()));
        }
        if self.message.trim().is_empty() {
            return Err(RelayError::InvalidRequest("message is required".to_string()));
        }
        Ok(())
    }

    /// 请求级 tracing span（request_id + user_id）
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %uuid::Uuid::new_v4(),
            user_id = %self.user_id
        )
    }
}

/// 编排的正常结束方式
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// 不需要动作，分类器的回答即最终结果
    Answered { message: String },
    /// Agent 发出 STOP
    Completed {
        summary: String,
        data: Value,
        action_log: Vec<String>,
    },
    /// Agent 发出 ERROR
    AgentFailed { message: String, data: Value },
}

/// 同步模式的返回体 `{success, data?, error?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessResult {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            success: true,
            data: Some(data.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

impl From<Outcome> for ProcessResult {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Answered { message } => ProcessResult::ok(message),
            Outcome::Completed { summary, .. } => ProcessResult::ok(summary),
            Outcome::AgentFailed { message, .. } => {
                ProcessResult::failure(format!("agent error: {message}"))
            }
        }
    }
}

pub struct Orchestrator {
    classifier: ClassifierGate,
    agent: Arc<dyn AgentBackend>,
    executor: ActionExecutor,
    max_turns: usize,
}

impl Orchestrator {
    pub fn new(
        classifier: ClassifierGate,
        agent: Arc<dyn AgentBackend>,
        executor: ActionExecutor,
        max_turns: usize,
    ) -> Self {
        Self {
            classifier,
            agent,
            executor,
            max_turns,
        }
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// 同步模式：跑完整个循环后一次性返回
    pub async fn process(&self, request: &TurnRequest) -> Result<ProcessResult, RelayError> {
        let span = request.span();
        let cancel = CancellationToken::new();
        let result = self.run(request, None, &cancel).instrument(span).await;
        if let Err(err) = &result {
            tracing::warn!(error = %err, class = ?err.class(), user_id = %request.user_id, "request failed");
        }
        result.map(ProcessResult::from)
    }

    /// 编排主循环；progress 为 None 时不发进度事件
    pub async fn run(
        &self,
        request: &TurnRequest,
        progress: Option<&ProgressEmitter>,
        cancel: &CancellationToken,
    ) -> Result<Outcome, RelayError> {
        request.validate()?;
        let mut turn = ConversationTurn::new(request.user_id.trim(), &request.message);

        turn.transition(LoopPhase::AwaitingClassification);
        notify(progress, json!({"message": "Analyzing message"}));
        let verdict = self.classifier.classify(&request.message).await?;
        notify(
            progress,
            json!({"message": "Message analyzed", "needs_action": verdict.needs_action}),
        );

        if !verdict.needs_action {
            turn.transition(LoopPhase::Done);
            return Ok(Outcome::Answered {
                message: verdict.response,
            });
        }
        tracing::info!(rationale = %verdict.response, "message requires action");

        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        notify(progress, json!({"message": "Creating session"}));
        let session_id = self.agent.create_session(&turn.user_id).await?;
        turn.session_id = Some(session_id.clone());

        loop {
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }
            if turn.exchanges >= self.max_turns {
                return Err(RelayError::MaxTurnsExceeded(self.max_turns));
            }

            turn.transition(LoopPhase::AwaitingAgent);
            notify(
                progress,
                json!({"message": "Processing with agent", "turn": turn.exchanges + 1}),
            );
            let event = self
                .agent
                .exchange(&turn.user_id, &session_id, &turn.current_message)
                .await?;
            turn.exchanges += 1;
            if cancel.is_cancelled() {
                return Err(RelayError::Cancelled);
            }

            match event {
                AgentEvent::Exec { namespace, payload } => {
                    turn.transition(LoopPhase::ExecutingAction);
                    let outcome = self
                        .execute_action(&turn.user_id, namespace.as_deref(), &payload, progress, cancel)
                        .await?;
                    turn.record_action(outcome);
                }
                AgentEvent::Stop { data } => {
                    turn.transition(LoopPhase::Summarizing);
                    notify(progress, json!({"message": "Generating summary of actions taken..."}));
                    let summary = self.classifier.summarize(&turn.summary_context(&data)).await?;
                    turn.transition(LoopPhase::Done);
                    return Ok(Outcome::Completed {
                        summary,
                        data,
                        action_log: turn.action_log,
                    });
                }
                AgentEvent::Error { data } => {
                    turn.transition(LoopPhase::Done);
                    let message = describe_error(&data);
                    tracing::warn!(error = %message, "agent reported an error");
                    return Ok(Outcome::AgentFailed { message, data });
                }
            }
        }
    }

    /// 执行一个 EXEC 动作，返回发回 Agent 的结果文本；动作失败不会终止循环，
    /// 只有请求已取消时返回 Err（此时不会发出上游调用）
    async fn execute_action(
        &self,
        user_id: &str,
        namespace: Option<&str>,
        payload: &Map<String, Value>,
        progress: Option<&ProgressEmitter>,
        cancel: &CancellationToken,
    ) -> Result<String, RelayError> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        notify(progress, json!({"message": "Executing function", "function": name}));
        if cancel.is_cancelled() {
            tracing::info!(function = %name, "request cancelled, action not dispatched");
            return Err(RelayError::Cancelled);
        }

        let result = match ActionRequest::from_payload(payload) {
            Ok(action) => self.executor.execute(user_id, namespace, &action).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(output) => {
                let response = output.to_json();
                notify(
                    progress,
                    json!({"message": "Function executed successfully", "function": name, "result": response}),
                );
                Ok(format!("Successfully executed function '{name}'. Received Response: {response}"))
            }
            Err(err) => {
                notify(
                    progress,
                    json!({"message": "Function execution failed", "function": name, "error": err.to_string()}),
                );
                Ok(format!("Failed to execute function '{name}'. Received Response: {err}"))
            }
        }
    }
}

fn notify(progress: Option<&ProgressEmitter>, data: Value) {
    if let Some(emitter) = progress {
        emitter.progress(data);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::agent::ScriptedAgent;
    use crate::core::credentials::{Credential, CredentialStore};
    use crate::dispatch::stripe::{stripe_registry, RecordingStripeApi};
    use crate::llm::ScriptedLlmClient;

    fn orchestrator(llm: ScriptedLlmClient, agent: Arc<ScriptedAgent>, max_turns: usize) -> Orchestrator {
        let api = Arc::new(RecordingStripeApi::new());
        let executor = ActionExecutor::new(
            Arc::new(stripe_registry(api, 10)),
            Arc::new(CredentialStore::new()),
            Duration::from_secs(5),
        );
        Orchestrator::new(
            ClassifierGate::new(Arc::new(llm), Duration::from_secs(5)),
            agent,
            executor,
            max_turns,
        )
    }

    #[test]
    fn test_request_aliases() {
        let req: TurnRequest = serde_json::from_str(r#"{"userId":"u1","message":"hi"}"#).unwrap();
        assert_eq!(req.user_id, "u1");
        let req: TurnRequest = serde_json::from_str(r#"{"userID":"u2","message":"hi"}"#).unwrap();
        assert_eq!(req.user_id, "u2");
    }

    #[tokio::test]
    async fn test_empty_input_is_rejected_before_any_call() {
        let llm = ScriptedLlmClient::new(Vec::<String>::new());
        let agent = Arc::new(ScriptedAgent::new());
        let orch = orchestrator(llm, agent.clone(), 5);

        let err = orch.process(&TurnRequest::new("u1", "   ")).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
        let err = orch.process(&TurnRequest::new("", "hi")).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidRequest(_)));
        assert_eq!(agent.sessions_created(), 0);
    }

    #[tokio::test]
    async fn test_failed_action_without_credential_keeps_looping() {
        let llm = ScriptedLlmClient::new([
            r#"{"needs_action": true, "response": "stripe"}"#,
            "Nothing could be done.",
        ]);
        let agent = Arc::new(
            ScriptedAgent::new()
                .exec("stripe_get_balance", json!({}))
                .stop(json!({"message": "gave up"})),
        );
        let orch = orchestrator(llm, agent.clone(), 5);

        let result = orch.process(&TurnRequest::new("u1", "what's my balance?")).await.unwrap();
        assert_eq!(result, ProcessResult::ok("Nothing could be done."));

        let messages = agent.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].starts_with("Failed to execute function 'stripe_get_balance'"));
        assert!(messages[1].contains("credential resolution failed"));
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_exchange() {
        let llm = ScriptedLlmClient::new([r#"{"needs_action": true, "response": "stripe"}"#]);
        let agent = Arc::new(ScriptedAgent::new().stop(json!({})));
        let orch = orchestrator(llm, agent.clone(), 5);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch
            .run(&TurnRequest::new("u1", "refund ch_1"), None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Cancelled));
        assert!(agent.messages().is_empty());
    }

    #[tokio::test]
    async fn test_agent_error_maps_to_failure_result() {
        let llm = ScriptedLlmClient::new([r#"{"needs_action": true, "response": "stripe"}"#]);
        let agent = Arc::new(ScriptedAgent::new().error(json!({"error": "quota exhausted"})));
        let orch = orchestrator(llm, agent, 5);
        let result = orch.process(&TurnRequest::new("u1", "list prices")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("agent error: quota exhausted"));
    }

    #[tokio::test]
    async fn test_exec_without_name_is_an_action_error() {
        let llm = ScriptedLlmClient::new([
            r#"{"needs_action": true, "response": "stripe"}"#,
            "summary",
        ]);
        let agent = Arc::new(
            ScriptedAgent::new()
                .respond(crate::agent::AgentResponse::exec(Some("stripe"), json!({"arguments": {}})))
                .stop(json!({})),
        );
        let orch = orchestrator(llm, agent.clone(), 5);
        let result = orch.process(&TurnRequest::new("u1", "do it")).await.unwrap();
        assert!(result.success);
        assert!(agent.messages()[1].starts_with("Failed to execute function 'unknown'"));
    }
}
