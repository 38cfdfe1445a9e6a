//! HTTP 接口（axum）
//!
//! - POST /process：同步模式，返回 `{success, data?, error?}`
//! - POST /process-stream：SSE，每条 `data: <ProgressEvent JSON>`
//! - POST /api/credentials、DELETE /api/credentials/:user_id：注册 / 删除用户 Stripe Key
//! - GET /api/operations：调度表清单
//! - GET /api/health

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use futures_util::stream;
use serde::Deserialize;
use serde_json::json;

use crate::core::credentials::Credential;
use crate::core::{spawn_stream, ErrorClass, Orchestrator, ProcessResult, RelayError, TurnRequest};

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Deserialize)]
struct RegisterKeyRequest {
    #[serde(alias = "userId", alias = "userID")]
    user_id: String,
    #[serde(alias = "apiKey")]
    api_key: String,
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = Arc::new(AppState { orchestrator });
    Router::new()
        .route("/process", post(process))
        .route("/process-stream", post(process_stream))
        .route("/api/credentials", post(register_key))
        .route("/api/credentials/:user_id", delete(remove_key))
        .route("/api/operations", get(list_operations))
        .route("/api/health", get(health))
        .with_state(state)
}

pub async fn serve(orchestrator: Arc<Orchestrator>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = router(orchestrator);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("payrelay listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn status_for(err: &RelayError) -> StatusCode {
    match err.class() {
        ErrorClass::Input => StatusCode::BAD_REQUEST,
        ErrorClass::Transport | ErrorClass::Protocol | ErrorClass::Decode => StatusCode::BAD_GATEWAY,
        ErrorClass::Limit | ErrorClass::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bad_body(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ProcessResult::failure(format!("Invalid request body: {}", rejection.body_text()))),
    )
        .into_response()
}

async fn process(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    match state.orchestrator.process(&request).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => (
            status_for(&err),
            Json(ProcessResult::failure(format!("{}: {}", err.stage(), err))),
        )
            .into_response(),
    }
}

async fn process_stream(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };

    let rx = spawn_stream(state.orchestrator.clone(), request);
    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Event::default().json_data(&event), rx))
    });

    Sse::new(events)
        .keep_alive(
            KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}

async fn register_key(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RegisterKeyRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "error", "error": rejection.body_text()})),
            )
                .into_response()
        }
    };

    let credentials = state.orchestrator.executor().credentials();
    match credentials.put(req.user_id.trim(), Credential::stripe(req.api_key.trim())).await {
        Ok(()) => {
            tracing::info!(user_id = %req.user_id.trim(), "stripe key registered");
            Json(json!({"status": "success"})).into_response()
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "error": err.to_string()})),
        )
            .into_response(),
    }
}

async fn remove_key(State(state): State<Arc<AppState>>, Path(user_id): Path<String>) -> Response {
    let user_id = user_id.trim();
    let credentials = state.orchestrator.executor().credentials();
    match credentials.remove(user_id).await {
        Ok(true) => Json(json!({"status": "success"})).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "error": format!("no credential found for user {user_id}")})),
        )
            .into_response(),
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "error", "error": err.to_string()})),
        )
            .into_response(),
    }
}

async fn list_operations(State(state): State<Arc<AppState>>) -> Response {
    Json(state.orchestrator.executor().registry().to_schema_json()).into_response()
}

async fn health() -> &'static str {
    "OK"
}
