//! 端到端编排场景：Scripted LLM + Scripted Agent + 记录型 Stripe 桩

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use payrelay::agent::{AgentBackend, AgentEvent, AgentResponse, ScriptedAgent};
use payrelay::classifier::ClassifierGate;
use payrelay::core::credentials::{Credential, CredentialStore};
use payrelay::core::{
    spawn_stream, Orchestrator, Outcome, ProcessResult, ProgressEmitter, ProgressEvent,
    ProgressKind, RelayError, TurnRequest,
};
use payrelay::dispatch::stripe::{stripe_registry, RecordingStripeApi};
use payrelay::dispatch::ActionExecutor;
use payrelay::llm::ScriptedLlmClient;
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio_util::sync::CancellationToken;

const NEEDS_ACTION: &str = r#"{"needs_action": true, "response": "requires the Stripe API"}"#;

struct Harness {
    orchestrator: Arc<Orchestrator>,
    agent: Arc<ScriptedAgent>,
    stripe: Arc<RecordingStripeApi>,
    llm: Arc<ScriptedLlmClient>,
}

async fn harness(llm: ScriptedLlmClient, agent: ScriptedAgent, max_turns: usize) -> Harness {
    let llm = Arc::new(llm);
    let agent = Arc::new(agent);
    let stripe = Arc::new(
        RecordingStripeApi::new().with_response(
            "/v1/customers",
            json!({"id": "cus_123", "object": "customer", "name": "Acme"}),
        ),
    );
    let credentials = Arc::new(CredentialStore::new());
    credentials
        .put("u1", Credential::stripe("sk_test_u1"))
        .await
        .unwrap();

    let executor = ActionExecutor::new(
        Arc::new(stripe_registry(stripe.clone(), 10)),
        credentials,
        Duration::from_secs(5),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        ClassifierGate::new(llm.clone(), Duration::from_secs(5)),
        agent.clone(),
        executor,
        max_turns,
    ));
    Harness {
        orchestrator,
        agent,
        stripe,
        llm,
    }
}

async fn collect(mut rx: UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

fn assert_stream_shape(events: &[ProgressEvent]) {
    assert!(events.len() >= 2);
    assert_eq!(events[0].kind, ProgressKind::Start);
    assert_eq!(events.iter().filter(|e| e.kind == ProgressKind::Start).count(), 1);
    let terminal: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.is_terminal())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(terminal, vec![events.len() - 1], "exactly one terminal event, last");
}

#[tokio::test]
async fn scenario_a_no_action_needed() {
    let h = harness(
        ScriptedLlmClient::new([r#"{"needs_action": false, "response": "I'm well, thanks!"}"#]),
        ScriptedAgent::new(),
        25,
    )
    .await;

    let result = h
        .orchestrator
        .process(&TurnRequest::new("u1", "hi, how are you?"))
        .await
        .unwrap();

    assert_eq!(result, ProcessResult::ok("I'm well, thanks!"));
    assert_eq!(h.agent.sessions_created(), 0);
    assert!(h.agent.messages().is_empty());
    assert_eq!(h.stripe.call_count(), 0);
    assert_eq!(h.llm.call_count(), 1);
}

#[tokio::test]
async fn scenario_b_exec_then_stop() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION, "I created the customer Acme (cus_123)."]),
        ScriptedAgent::new()
            .exec("stripe_post_customers", json!({"name": "Acme"}))
            .stop(json!({"message": "done"})),
        25,
    )
    .await;

    let outcome = h
        .orchestrator
        .run(
            &TurnRequest::new("u1", "create a customer named Acme"),
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    match outcome {
        Outcome::Completed {
            summary,
            data,
            action_log,
        } => {
            assert_eq!(summary, "I created the customer Acme (cus_123).");
            assert_eq!(data, json!({"message": "done"}));
            assert_eq!(action_log.len(), 1);
            assert!(action_log[0].starts_with("Successfully executed function 'stripe_post_customers'. Received Response: "));
            assert!(action_log[0].contains("cus_123"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    assert_eq!(h.stripe.call_count(), 1);
    let call = &h.stripe.calls()[0];
    assert_eq!(call.secret, "sk_test_u1");
    assert_eq!(call.request.params.get_str("name"), Some("Acme"));

    let messages = h.agent.messages();
    assert_eq!(messages[0], "create a customer named Acme");
    assert!(messages[1].contains("cus_123"));

    let summary_call = &h.llm.calls()[1];
    let context = &summary_call[1].content;
    assert!(context.starts_with("User request: create a customer named Acme\nAction 1: Successfully executed"));
    assert!(context.ends_with("Final results: {\"message\":\"done\"}"));
}

#[tokio::test]
async fn scenario_b_sync_result() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION, "Customer created."]),
        ScriptedAgent::new()
            .exec("stripe_post_customers", json!({"name": "Acme"}))
            .stop(json!({"message": "done"})),
        25,
    )
    .await;

    let result = h
        .orchestrator
        .process(&TurnRequest::new("u1", "create a customer named Acme"))
        .await
        .unwrap();
    assert_eq!(result, ProcessResult::ok("Customer created."));
    assert_eq!(h.agent.sessions_created(), 1);
}

#[tokio::test]
async fn scenario_c_immediate_agent_error() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION]),
        ScriptedAgent::new().error(json!({"message": "bad session"})),
        25,
    )
    .await;

    let result = h
        .orchestrator
        .process(&TurnRequest::new("u1", "refund my last charge"))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.unwrap().contains("bad session"));
    assert_eq!(h.stripe.call_count(), 0);
    // 不生成摘要
    assert_eq!(h.llm.call_count(), 1);
}

#[tokio::test]
async fn scenario_d_unknown_operation_keeps_looping() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION, "Sorry, that is not supported."]),
        ScriptedAgent::new()
            .exec("stripe_launch_rocket", json!({}))
            .stop(json!({"message": "unsupported"})),
        25,
    )
    .await;

    let result = h
        .orchestrator
        .process(&TurnRequest::new("u1", "launch a rocket via stripe"))
        .await
        .unwrap();
    assert!(result.success);

    let messages = h.agent.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].contains("stripe_launch_rocket"));
    assert!(messages[1].contains("unknown function"));
    assert!(messages[1].starts_with("Failed to execute function 'stripe_launch_rocket'"));
    assert_eq!(h.stripe.call_count(), 0);
}

#[tokio::test]
async fn action_log_tracks_every_exec_in_order() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION, "summary"]),
        ScriptedAgent::new()
            .exec("stripe_post_customers", json!({"name": "Acme"}))
            .exec("stripe_get_products_id", json!({}))
            .exec("stripe_get_balance", json!({}))
            .stop(json!({})),
        25,
    )
    .await;

    let outcome = h
        .orchestrator
        .run(&TurnRequest::new("u1", "do three things"), None, &CancellationToken::new())
        .await
        .unwrap();

    let Outcome::Completed { action_log, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(action_log.len(), 3);
    assert!(action_log[0].contains("'stripe_post_customers'"));
    assert!(action_log[1].starts_with("Failed to execute function 'stripe_get_products_id'"));
    assert!(action_log[1].contains("missing required field `id`"));
    assert!(action_log[2].starts_with("Successfully executed function 'stripe_get_balance'"));
}

#[tokio::test]
async fn all_exec_sequence_ends_at_turn_ceiling() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION]),
        ScriptedAgent::new().repeat(AgentResponse::exec(
            Some("stripe"),
            json!({"name": "stripe_get_balance", "arguments": {}}),
        )),
        4,
    )
    .await;

    let err = h
        .orchestrator
        .process(&TurnRequest::new("u1", "loop forever"))
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::MaxTurnsExceeded(4)));
    assert_eq!(err.to_string(), "max turns exceeded (4)");
    assert_eq!(h.agent.messages().len(), 4);
    assert_eq!(h.stripe.call_count(), 4);
}

#[tokio::test]
async fn stream_all_exec_sequence_has_single_terminal_error() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION]),
        ScriptedAgent::new().repeat(AgentResponse::exec(
            Some("stripe"),
            json!({"name": "stripe_get_balance", "arguments": {}}),
        )),
        3,
    )
    .await;

    let events = collect(spawn_stream(
        h.orchestrator.clone(),
        TurnRequest::new("u1", "loop forever"),
    ))
    .await;

    assert_stream_shape(&events);
    let last = events.last().unwrap();
    assert_eq!(last.kind, ProgressKind::Error);
    assert_eq!(last.data["error"], "max turns exceeded (3)");
}

#[tokio::test]
async fn stream_exec_then_stop_reports_progress_in_order() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION, "Created Acme."]),
        ScriptedAgent::new()
            .exec("stripe_post_customers", json!({"name": "Acme"}))
            .exec("stripe_launch_rocket", json!({}))
            .stop(json!({"message": "done"})),
        25,
    )
    .await;

    let events = collect(spawn_stream(
        h.orchestrator.clone(),
        TurnRequest::new("u1", "create a customer named Acme"),
    ))
    .await;

    assert_stream_shape(&events);
    let messages: Vec<&str> = events.iter().filter_map(|e| e.message()).collect();
    assert_eq!(
        messages,
        vec![
            "Starting message processing",
            "Analyzing message",
            "Message analyzed",
            "Creating session",
            "Processing with agent",
            "Executing function",
            "Function executed successfully",
            "Processing with agent",
            "Executing function",
            "Function execution failed",
            "Processing with agent",
            "Generating summary of actions taken...",
            "Created Acme.",
        ]
    );

    let success = &events[6];
    assert_eq!(success.data["result"]["id"], "cus_123");
    let failure = &events[9];
    assert!(failure.data["error"].as_str().unwrap().contains("unknown function"));

    let last = events.last().unwrap();
    assert_eq!(last.kind, ProgressKind::Complete);
    assert_eq!(last.data["data"], json!({"message": "done"}));
}

#[tokio::test]
async fn stream_remote_error_ends_with_error() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION]),
        ScriptedAgent::new().error(json!({"message": "bad session"})),
        25,
    )
    .await;

    let events = collect(spawn_stream(
        h.orchestrator.clone(),
        TurnRequest::new("u1", "refund"),
    ))
    .await;

    assert_stream_shape(&events);
    let last = events.last().unwrap();
    assert_eq!(last.kind, ProgressKind::Error);
    assert_eq!(last.message(), Some("bad session"));
}

#[tokio::test]
async fn stream_protocol_violation_ends_with_error() {
    let h = harness(
        ScriptedLlmClient::new([NEEDS_ACTION]),
        ScriptedAgent::new().respond(AgentResponse {
            event: "PING".to_string(),
            namespace: None,
            data: json!({}),
        }),
        25,
    )
    .await;

    let events = collect(spawn_stream(
        h.orchestrator.clone(),
        TurnRequest::new("u1", "refund"),
    ))
    .await;

    assert_stream_shape(&events);
    let last = events.last().unwrap();
    assert_eq!(last.message(), Some("Unknown event"));
    assert_eq!(last.data["error"], "unknown event type: PING");
}

#[tokio::test]
async fn stream_classifier_failure_ends_with_error() {
    let h = harness(
        ScriptedLlmClient::new(Vec::<String>::new()).then_fail("rate limited"),
        ScriptedAgent::new(),
        25,
    )
    .await;

    let events = collect(spawn_stream(
        h.orchestrator.clone(),
        TurnRequest::new("u1", "hello"),
    ))
    .await;

    assert_stream_shape(&events);
    assert_eq!(events.last().unwrap().message(), Some("Failed to analyze message"));
    assert_eq!(h.agent.sessions_created(), 0);
}

/// 交换进行中消费端断开：收到请求后丢弃进度接收端，再返回一个退款 EXEC
struct DisconnectingAgent {
    receiver: Mutex<Option<UnboundedReceiver<ProgressEvent>>>,
    exchanges: Mutex<usize>,
}

#[async_trait]
impl AgentBackend for DisconnectingAgent {
    async fn create_session(&self, user_id: &str) -> Result<String, RelayError> {
        Ok(format!("session-{user_id}"))
    }

    async fn exchange(
        &self,
        _user_id: &str,
        _session_id: &str,
        _message: &str,
    ) -> Result<AgentEvent, RelayError> {
        *self.exchanges.lock().unwrap() += 1;
        drop(self.receiver.lock().unwrap().take());
        AgentResponse::exec(
            Some("stripe"),
            json!({"name": "stripe_post_refunds", "arguments": {"charge": "ch_1"}}),
        )
        .into_event()
    }
}

#[tokio::test]
async fn consumer_disconnect_mid_exchange_dispatches_nothing() {
    let (tx, rx) = unbounded_channel();
    let agent = Arc::new(DisconnectingAgent {
        receiver: Mutex::new(Some(rx)),
        exchanges: Mutex::new(0),
    });
    let stripe = Arc::new(RecordingStripeApi::new());
    let credentials = Arc::new(CredentialStore::new());
    credentials
        .put("u1", Credential::stripe("sk_test_u1"))
        .await
        .unwrap();
    let orchestrator = Orchestrator::new(
        ClassifierGate::new(
            Arc::new(ScriptedLlmClient::new([NEEDS_ACTION])),
            Duration::from_secs(5),
        ),
        agent.clone(),
        ActionExecutor::new(
            Arc::new(stripe_registry(stripe.clone(), 10)),
            credentials,
            Duration::from_secs(5),
        ),
        25,
    );

    let cancel = CancellationToken::new();
    let emitter = ProgressEmitter::start(tx, cancel.clone());
    let result = orchestrator
        .run(&TurnRequest::new("u1", "refund ch_1"), Some(&emitter), &cancel)
        .await;

    assert!(matches!(result, Err(RelayError::Cancelled)));
    assert!(cancel.is_cancelled());
    assert_eq!(*agent.exchanges.lock().unwrap(), 1);
    assert_eq!(stripe.call_count(), 0);
}
