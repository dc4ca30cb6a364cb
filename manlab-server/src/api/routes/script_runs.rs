//! Script run routes.
//!
//! Script runs ride the command queue: the run row tracks the queued
//! command, and the hub mirrors the command's terminal state onto the run.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::Error;
use crate::api::auth::Requester;
use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::database::models::{ScriptRunDbModel, ScriptRunStatus};

/// Routes nested under `/api/devices/{node_id}/script-runs`.
pub fn device_router() -> Router<AppState> {
    Router::new().route("/", post(create))
}

/// Routes nested under `/api/script-runs`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{run_id}", get(get_run))
        .route("/{run_id}/cancel", post(cancel))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    script_id: String,
    #[serde(default)]
    args: Vec<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CreateQuery {
    /// Wait for completion and return the output inline.
    #[serde(default)]
    wait: bool,
}

async fn create(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(node_id): Path<String>,
    Query(query): Query<CreateQuery>,
    Json(request): Json<CreateRequest>,
) -> ApiResult<(StatusCode, Json<ScriptRunDbModel>)> {
    state.nodes.get(&node_id).await?;
    let script = state.scripts.get_script(&request.script_id).await?;

    let run_id = Uuid::new_v4();
    let timeout = request
        .timeout_seconds
        .unwrap_or(script.timeout_seconds.max(0) as u64);

    let command_id = state
        .dispatcher
        .enqueue_and_dispatch(
            &node_id,
            agent_proto::CommandType::ScriptRun,
            json!({
                "runId": run_id,
                "script": script.content,
                "timeoutSeconds": timeout,
                "args": request.args,
            }),
        )
        .await?;

    let run = ScriptRunDbModel {
        id: run_id.to_string(),
        script_id: script.id.clone(),
        node_id: node_id.clone(),
        command_id: command_id.clone(),
        status: ScriptRunStatus::Pending.as_str().to_string(),
        output_log: None,
        requested_by: requester.clone(),
        created_at: Utc::now().to_rfc3339(),
        completed_at: None,
    };
    state.scripts.create_run(&run).await?;

    state.audit.record(
        "script.run",
        "command",
        &requester,
        Some(node_id),
        true,
        format!("script {} run {}", script.name, run_id),
    );

    if query.wait {
        // Synchronous mode: correlate the command to a terminal state.
        match state.waiter.wait_generic(&command_id).await {
            Ok(_) | Err(Error::AgentFailed { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        let run = state.scripts.get_run(&run.id).await?;
        return Ok((StatusCode::OK, Json(run)));
    }

    Ok((StatusCode::ACCEPTED, Json(run)))
}

async fn get_run(
    State(state): State<AppState>,
    _requester: Requester,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ScriptRunDbModel>> {
    let run = state.scripts.get_run(&run_id).await?;
    Ok(Json(run))
}

async fn cancel(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(run_id): Path<String>,
) -> ApiResult<Json<ScriptRunDbModel>> {
    let run = state.scripts.get_run(&run_id).await?;

    if run.status().is_some_and(|s| s.is_terminal()) {
        // Idempotent: cancelling a finished run reports its final state.
        return Ok(Json(run));
    }

    let target = Uuid::parse_str(&run.command_id)
        .map_err(|_| Error::Database(format!("corrupt command id on run {}", run.id)))?;
    state.dispatcher.send_cancel(&run.node_id, target).await;

    state
        .scripts
        .set_run_status(&run.id, ScriptRunStatus::Cancelled, None)
        .await?;

    state.audit.record(
        "script.cancelled",
        "command",
        &requester,
        Some(run.node_id.clone()),
        true,
        format!("script run {}", run.id),
    );

    let run = state.scripts.get_run(&run_id).await?;
    Ok(Json(run))
}
