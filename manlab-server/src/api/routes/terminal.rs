//! Terminal session routes.
//!
//! Mounted under `/api/devices/{node_id}/terminal`.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::auth::Requester;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::sessions::{Session, SessionKind};

/// Create the terminal router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/open", post(open))
        .route("/{session_id}", get(get_session))
        .route("/{session_id}/input", post(input))
        .route("/{session_id}/close", post(close))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OpenRequest {
    ttl_seconds: Option<u64>,
    shell: Option<String>,
    cols: Option<u16>,
    rows: Option<u16>,
}

async fn open(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(node_id): Path<String>,
    Json(request): Json<OpenRequest>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .create_terminal(&node_id, request.ttl_seconds, &requester)
        .await?;

    // Best-effort immediate open; a disconnected agent gets it on replay.
    state
        .dispatcher
        .enqueue_and_dispatch(
            &node_id,
            agent_proto::CommandType::TerminalOpen,
            json!({
                "sessionId": session.id,
                "shell": request.shell,
                "cols": request.cols,
                "rows": request.rows,
            }),
        )
        .await?;

    state.audit.record(
        "terminal.opened",
        "session",
        &requester,
        Some(node_id),
        true,
        format!("terminal session {}", session.id),
    );

    Ok(Json(session))
}

async fn get_session(
    State(state): State<AppState>,
    _requester: Requester,
    Path((node_id, session_id)): Path<(String, Uuid)>,
) -> ApiResult<Json<Session>> {
    let session = lookup(&state, &node_id, session_id)?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
struct InputRequest {
    data: String,
}

async fn input(
    State(state): State<AppState>,
    _requester: Requester,
    Path((node_id, session_id)): Path<(String, Uuid)>,
    Json(request): Json<InputRequest>,
) -> ApiResult<StatusCode> {
    let session = lookup(&state, &node_id, session_id)?;

    state
        .dispatcher
        .enqueue_and_dispatch(
            &session.node_id,
            agent_proto::CommandType::TerminalInput,
            json!({ "sessionId": session.id, "data": request.data }),
        )
        .await?;

    Ok(StatusCode::ACCEPTED)
}

async fn close(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path((node_id, session_id)): Path<(String, Uuid)>,
) -> ApiResult<StatusCode> {
    // Close is idempotent: an expired or already-closed session still
    // answers 200 and re-sends the close best-effort.
    state.sessions.close(session_id).await?;

    let _ = state
        .dispatcher
        .enqueue_and_dispatch(
            &node_id,
            agent_proto::CommandType::TerminalClose,
            json!({ "sessionId": session_id }),
        )
        .await;

    state.audit.record(
        "terminal.closed",
        "session",
        &requester,
        Some(node_id),
        true,
        format!("terminal session {}", session_id),
    );

    Ok(StatusCode::OK)
}

fn lookup(state: &AppState, node_id: &str, session_id: Uuid) -> Result<Session, ApiError> {
    let session = state
        .sessions
        .try_get(session_id, SessionKind::Terminal)
        .ok_or_else(|| ApiError::not_found("Session not found or expired"))?;
    if session.node_id != node_id {
        return Err(ApiError::not_found("Session not found or expired"));
    }
    Ok(session)
}
