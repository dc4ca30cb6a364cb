//! Onboarding routes: minting one-shot enrollment tokens.
//!
//! The token is returned exactly once; only its hash is stored. The agent
//! presents it on first connect and receives a durable auth key.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::post,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::auth::Requester;
use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::crypto;

/// Create the onboarding router.
pub fn router() -> Router<AppState> {
    Router::new().route("/machines", post(register_machine))
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    hostname: Option<String>,
}

async fn register_machine(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let token = crypto::generate_enrollment_token();
    let machine = state
        .onboarding
        .register(&crypto::hash_auth_key(&token), request.hostname.as_deref())
        .await?;

    state.audit.record(
        "node.onboarding_token_created",
        "node",
        &requester,
        None,
        true,
        format!("machine {}", machine.id),
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "machineId": machine.id,
            "enrollmentToken": token,
            "hostname": machine.hostname,
        })),
    ))
}
