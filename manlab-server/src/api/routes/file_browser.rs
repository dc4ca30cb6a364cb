//! File browser session routes.
//!
//! Mounted under `/api/devices/{node_id}/file-browser-sessions`. Every path
//! accepted here is normalized and revalidated against the session root
//! before it reaches an agent.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use agent_proto::{FileListResult, FileReadResult};

use crate::Error;
use crate::api::auth::Requester;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::sessions::paths::resolve_in_root;
use crate::sessions::{Session, SessionKind};

/// Byte limit handed to unrestricted system sessions.
const SYSTEM_SESSION_BYTE_LIMIT: i64 = 32 * 1024;

/// Create the file browser router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create))
        .route("/system", post(create_system))
        .route("/{session_id}/list", post(list))
        .route("/{session_id}/read", post(read))
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
        .create_file_browser(&node_id, &request.policy_id, request.ttl_seconds, &requester)
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CreateSystemRequest {
    ttl_seconds: Option<u64>,
}

async fn create_system(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(node_id): Path<String>,
    Json(request): Json<CreateSystemRequest>,
) -> ApiResult<Json<Session>> {
    let session = state
        .sessions
        .create_system_file_browser(
            &node_id,
            request.ttl_seconds,
            &requester,
            SYSTEM_SESSION_BYTE_LIMIT,
        )
        .await?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListRequest {
    path: String,
    max_entries: Option<u32>,
}

async fn list(
    State(state): State<AppState>,
    _requester: Requester,
    Path((node_id, session_id)): Path<(String, Uuid)>,
    Json(request): Json<ListRequest>,
) -> ApiResult<Json<FileListResult>> {
    let session = lookup(&state, &node_id, session_id)?;
    let path = resolve_in_root(&session.root, &request.path)?;

    let command_id = state
        .dispatcher
        .enqueue_and_dispatch(
            &session.node_id,
            agent_proto::CommandType::FileList,
            json!({ "path": path, "maxEntries": request.max_entries }),
        )
        .await?;

    let item = state.waiter.wait_file_op(&command_id).await?;
    let raw = item.output_log.unwrap_or_default();
    // Older agents reply with a bare entry array; both shapes are accepted.
    let listing = FileListResult::parse(&raw).map_err(|_| Error::MalformedAgentResponse)?;
    Ok(Json(listing))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReadRequest {
    path: String,
    offset: Option<u64>,
    max_bytes: Option<u64>,
}

async fn read(
    State(state): State<AppState>,
    _requester: Requester,
    Path((node_id, session_id)): Path<(String, Uuid)>,
    Json(request): Json<ReadRequest>,
) -> ApiResult<Json<FileReadResult>> {
    let session = lookup(&state, &node_id, session_id)?;
    let path = resolve_in_root(&session.root, &request.path)?;

    let limit = session.byte_limit.max(0) as u64;
    let max_bytes = request.max_bytes.map_or(limit, |n| n.min(limit));

    let command_id = state
        .dispatcher
        .enqueue_and_dispatch(
            &session.node_id,
            agent_proto::CommandType::FileRead,
            json!({ "path": path, "offset": request.offset, "maxBytes": max_bytes }),
        )
        .await?;

    let item = state.waiter.wait_file_op(&command_id).await?;
    let raw = item.output_log.unwrap_or_default();
    let result: FileReadResult =
        serde_json::from_str(&raw).map_err(|_| Error::MalformedAgentResponse)?;
    Ok(Json(result))
}

fn lookup(state: &AppState, node_id: &str, session_id: Uuid) -> Result<Session, ApiError> {
    let session = state
        .sessions
        .try_get(session_id, SessionKind::FileBrowser)
        .ok_or_else(|| ApiError::not_found("Session not found or expired"))?;
    if session.node_id != node_id {
        return Err(ApiError::not_found("Session not found or expired"));
    }
    Ok(session)
}
