//! Device (node) routes: listing, settings, command inspection, service
//! status.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::auth::Requester;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::database::models::{NodeDbModel, NodeSettingsDbModel};
use crate::{Error, Result};

/// Create the devices router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_devices))
        .route("/{node_id}", get(get_device).delete(delete_device))
        .route("/{node_id}/settings", get(get_settings).put(put_settings))
        .route("/{node_id}/commands/{command_id}", get(get_command))
        .route("/{node_id}/services/status", post(service_status))
}

/// Node DTO with the live-connection flag.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceDto {
    #[serde(flatten)]
    node: NodeDbModel,
    connected: bool,
}

async fn list_devices(
    State(state): State<AppState>,
    _requester: Requester,
) -> ApiResult<Json<Vec<DeviceDto>>> {
    let nodes = state.nodes.list().await?;
    let connected = state.registry.snapshot_connected_nodes();
    let devices = nodes
        .into_iter()
        .map(|node| {
            let is_connected = connected.contains(&node.id);
            DeviceDto {
                node,
                connected: is_connected,
            }
        })
        .collect();
    Ok(Json(devices))
}

async fn get_device(
    State(state): State<AppState>,
    _requester: Requester,
    Path(node_id): Path<String>,
) -> ApiResult<Json<DeviceDto>> {
    let node = state.nodes.get(&node_id).await?;
    let connected = state.registry.is_connected(&node_id);
    Ok(Json(DeviceDto { node, connected }))
}

async fn delete_device(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(node_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.nodes.delete(&node_id).await? {
        return Err(Error::not_found("Node", node_id).into());
    }
    state.audit.record(
        "node.removed",
        "node",
        &requester,
        Some(node_id.clone()),
        true,
        "node removed by operator",
    );
    Ok(Json(json!({ "deleted": true })))
}

async fn get_settings(
    State(state): State<AppState>,
    _requester: Requester,
    Path(node_id): Path<String>,
) -> ApiResult<Json<NodeSettingsDbModel>> {
    state.nodes.get(&node_id).await?;
    let settings = state.settings.get_node_settings(&node_id).await?;
    Ok(Json(settings))
}

/// Settings update payload; omitted fields keep their current value.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SettingsUpdate {
    remote_tools_enabled: Option<bool>,
    auto_update_enabled: Option<bool>,
    auto_update_approval: Option<String>,
    maintenance_window_start: Option<String>,
    maintenance_window_end: Option<String>,
    system_update_enabled: Option<bool>,
    system_update_categories: Option<Vec<String>>,
    auto_approve_updates: Option<bool>,
}

async fn put_settings(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(node_id): Path<String>,
    Json(update): Json<SettingsUpdate>,
) -> ApiResult<Json<NodeSettingsDbModel>> {
    state.nodes.get(&node_id).await?;
    let mut settings = state.settings.get_node_settings(&node_id).await?;

    apply_update(&mut settings, update)?;
    state.settings.upsert_node_settings(&settings).await?;

    state.audit.record(
        "node.settings_updated",
        "node",
        &requester,
        Some(node_id),
        true,
        "node settings updated",
    );
    Ok(Json(settings))
}

fn apply_update(settings: &mut NodeSettingsDbModel, update: SettingsUpdate) -> Result<()> {
    if let Some(v) = update.remote_tools_enabled {
        settings.remote_tools_enabled = v;
    }
    if let Some(v) = update.auto_update_enabled {
        settings.auto_update_enabled = v;
        if v {
            settings.auto_update_failures = 0;
        }
    }
    if let Some(v) = update.auto_update_approval {
        if crate::database::models::UpdateApproval::parse(&v).is_none() {
            return Err(Error::validation(
                "approval mode must be 'automatic' or 'manual'",
            ));
        }
        settings.auto_update_approval = v;
    }

    match (
        &update.maintenance_window_start,
        &update.maintenance_window_end,
    ) {
        (Some(start), Some(end)) => {
            if crate::database::models::MaintenanceWindow::parse(start, end).is_none() {
                return Err(Error::validation(
                    "maintenance window must be HH:MM-HH:MM UTC",
                ));
            }
            settings.maintenance_window_start = Some(start.clone());
            settings.maintenance_window_end = Some(end.clone());
        }
        (None, None) => {}
        _ => {
            return Err(Error::validation(
                "maintenance window start and end must be set together",
            ));
        }
    }

    if let Some(v) = update.system_update_enabled {
        settings.system_update_enabled = v;
    }
    if let Some(v) = update.system_update_categories {
        settings.system_update_categories = serde_json::to_string(&v)?;
    }
    if let Some(v) = update.auto_approve_updates {
        settings.auto_approve_updates = v;
    }
    Ok(())
}

async fn get_command(
    State(state): State<AppState>,
    _requester: Requester,
    Path((node_id, command_id)): Path<(String, String)>,
) -> ApiResult<Json<crate::database::models::CommandQueueItemDbModel>> {
    let command = state.commands.get(&command_id).await?;
    if command.node_id != node_id {
        return Err(Error::not_found("Command", command_id).into());
    }
    Ok(Json(command))
}

/// Service status request.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceStatusRequest {
    services: Vec<String>,
}

async fn service_status(
    State(state): State<AppState>,
    _requester: Requester,
    Path(node_id): Path<String>,
    Json(request): Json<ServiceStatusRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if request.services.is_empty() {
        return Err(ApiError::bad_request("at least one service is required"));
    }
    state.nodes.get(&node_id).await?;

    let command_id = state
        .dispatcher
        .enqueue_and_dispatch(
            &node_id,
            agent_proto::CommandType::ServiceStatus,
            json!({ "services": request.services }),
        )
        .await?;

    let item = state.waiter.wait_generic(&command_id).await?;
    let raw = item.output_log.unwrap_or_default();
    let parsed: serde_json::Value =
        serde_json::from_str(&raw).map_err(|_| Error::MalformedAgentResponse)?;
    Ok(Json(parsed))
}
