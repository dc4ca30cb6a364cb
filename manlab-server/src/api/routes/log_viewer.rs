//! Log viewer session routes.
//!
//! Mounted under `/api/devices/{node_id}/log-viewer-sessions`. Sessions are
//! scoped to one allow-listed log file; reads and tails correlate through
//! the command queue.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use agent_proto::FileReadResult;

use crate::api::auth::Requester;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::sessions::{Session, SessionKind};
use crate::Error;

/// Create the log viewer router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/{session_id}/read", post(read))
        .route("/{session_id}/tail", post(tail))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    policy_id: String,
    ttl_seconds: Option<u64>,
}

async fn create(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(node_id): Path<String>,
    Json(request): Json<CreateRequest>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .create_log_viewer(&node_id, &request.policy_id, request.ttl_seconds, &requester)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ReadRequest {
    max_bytes: Option<u64>,
}

async fn read(
    State(state): State<AppState>,
    _requester: Requester,
    Path((node_id, session_id)): Path<(String, Uuid)>,
    Json(request): Json<ReadRequest>,
) -> ApiResult<Json<FileReadResult>> {
    let session = lookup(&state, &node_id, session_id)?;
    let max_bytes = clamp_bytes(request.max_bytes, session.byte_limit);

    let command_id = state
        .dispatcher
        .enqueue_and_dispatch(
            &session.node_id,
            agent_proto::CommandType::LogRead,
            json!({ "path": session.root, "maxBytes": max_bytes }),
        )
        .await?;

    let item = state.waiter.wait_file_op(&command_id).await?;
    parse_read_result(item.output_log.as_deref().unwrap_or_default()).map(Json)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TailRequest {
    duration_seconds: u64,
    max_bytes: Option<u64>,
}

async fn tail(
    State(state): State<AppState>,
    _requester: Requester,
    Path((node_id, session_id)): Path<(String, Uuid)>,
    Json(request): Json<TailRequest>,
) -> ApiResult<Json<FileReadResult>> {
    if request.duration_seconds == 0 || request.duration_seconds > 300 {
        return Err(ApiError::bad_request(
            "durationSeconds must be between 1 and 300",
        ));
    }
    let session = lookup(&state, &node_id, session_id)?;
    let max_bytes = clamp_bytes(request.max_bytes, session.byte_limit);

    let command_id = state
        .dispatcher
        .enqueue_and_dispatch(
            &session.node_id,
            agent_proto::CommandType::LogTail,
            json!({
                "path": session.root,
                "durationSeconds": request.duration_seconds,
                "maxBytes": max_bytes,
            }),
        )
        .await?;

    // The agent holds the tail open for the requested duration; wait that
    // long plus the usual slack.
    let timeout = state.waiter.config().log_tail_timeout(request.duration_seconds);
    let item = state.waiter.wait(&command_id, timeout).await?;
    parse_read_result(item.output_log.as_deref().unwrap_or_default()).map(Json)
}

fn lookup(state: &AppState, node_id: &str, session_id: Uuid) -> Result<Session, ApiError> {
    let session = state
        .sessions
        .try_get(session_id, SessionKind::LogViewer)
        .ok_or_else(|| ApiError::not_found("Session not found or expired"))?;
    if session.node_id != node_id {
        return Err(ApiError::not_found("Session not found or expired"));
    }
    Ok(session)
}

fn clamp_bytes(requested: Option<u64>, session_limit: i64) -> u64 {
    let limit = session_limit.max(0) as u64;
    match requested {
        Some(n) => n.min(limit),
        None => limit,
    }
}

fn parse_read_result(raw: &str) -> Result<FileReadResult, ApiError> {
    serde_json::from_str::<FileReadResult>(raw)
        .map_err(|_| Error::MalformedAgentResponse.into())
}
