//! Update routes: manual scheduler triggers and the system-update approval
//! workflow.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde_json::json;

use crate::api::auth::Requester;
use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::database::models::{SystemUpdateHistoryDbModel, SystemUpdateStatus};
use crate::scheduler::{JobSummary, JobTrigger};

/// Create the updates router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agent/check", post(check_agent_updates))
        .route("/system/check", post(check_system_updates))
        .route("/system", get(list_histories))
        .route("/system/{history_id}", get(get_history))
        .route("/system/{history_id}/approve", post(approve))
        .route("/system/{history_id}/cancel", post(cancel))
}

async fn check_agent_updates(
    State(state): State<AppState>,
    Requester(requester): Requester,
) -> ApiResult<Json<JobSummary>> {
    let summary = state
        .agent_update_job
        .trigger(JobTrigger::Manual { actor: requester })
        .await?;
    Ok(Json(summary))
}

async fn check_system_updates(
    State(state): State<AppState>,
    Requester(requester): Requester,
) -> ApiResult<Json<JobSummary>> {
    let summary = state
        .system_update_job
        .trigger(JobTrigger::Manual { actor: requester })
        .await?;
    Ok(Json(summary))
}

async fn list_histories(
    State(state): State<AppState>,
    _requester: Requester,
) -> ApiResult<Json<Vec<SystemUpdateHistoryDbModel>>> {
    let histories = state.updates.list_histories(100).await?;
    Ok(Json(histories))
}

async fn get_history(
    State(state): State<AppState>,
    _requester: Requester,
    Path(history_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let history = state.updates.get_history(&history_id).await?;
    let logs = state.updates.list_logs(&history_id).await?;
    Ok(Json(json!({ "history": history, "logs": logs })))
}

async fn approve(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(history_id): Path<String>,
) -> ApiResult<Json<SystemUpdateHistoryDbModel>> {
    state
        .updates
        .set_history_status(&history_id, SystemUpdateStatus::Approved, &requester, None)
        .await?;

    state.audit.record(
        "system.update.approved",
        "update",
        &requester,
        None,
        true,
        format!("history {}", history_id),
    );

    // Approved updates execute asynchronously.
    state.system_update_exec.execute_async(history_id.clone());

    let history = state.updates.get_history(&history_id).await?;
    Ok(Json(history))
}

async fn cancel(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(history_id): Path<String>,
) -> ApiResult<Json<SystemUpdateHistoryDbModel>> {
    state
        .updates
        .set_history_status(&history_id, SystemUpdateStatus::Cancelled, &requester, None)
        .await?;

    state.audit.record(
        "system.update.cancelled",
        "update",
        &requester,
        None,
        true,
        format!("history {}", history_id),
    );

    let history = state.updates.get_history(&history_id).await?;
    Ok(Json(history))
}
