//! System settings routes.
//!
//! Key/value settings for the control plane itself. Values flagged secret
//! are sealed with AES-GCM before persist and opened on read.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::Requester;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

/// Create the system settings router.
pub fn router() -> Router<AppState> {
    Router::new().route("/{key}", get(get_setting).put(put_setting))
}

async fn get_setting(
    State(state): State<AppState>,
    _requester: Requester,
    Path(key): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let Some(setting) = state.settings.get_system_setting(&key).await? else {
        return Err(ApiError::not_found(format!("setting '{}' not found", key)));
    };

    let value = if setting.is_secret {
        let sealer = state
            .sealer
            .as_ref()
            .ok_or_else(|| ApiError::internal("settings key is not configured"))?;
        sealer.open(&setting.value)?
    } else {
        setting.value
    };

    Ok(Json(json!({
        "key": setting.key,
        "value": value,
        "isSecret": setting.is_secret,
        "updatedAt": setting.updated_at,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutRequest {
    value: String,
    #[serde(default)]
    is_secret: bool,
}

async fn put_setting(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(key): Path<String>,
    Json(request): Json<PutRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let stored = if request.is_secret {
        let sealer = state
            .sealer
            .as_ref()
            .ok_or_else(|| ApiError::bad_request("secret settings require a configured key"))?;
        sealer.seal(&request.value)?
    } else {
        request.value
    };

    state
        .settings
        .set_system_setting(&key, &stored, request.is_secret)
        .await?;

    state.audit.record(
        "settings.updated",
        "settings",
        &requester,
        None,
        true,
        format!("setting '{}'", key),
    );

    Ok(Json(json!({ "key": key, "isSecret": request.is_secret })))
}
