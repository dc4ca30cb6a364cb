//! Health and liveness routes.

use axum::{Json, Router, extract::State, routing::get};
use serde_json::json;

use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/live", get(live))
        .route("/", get(health))
}

async fn live() -> &'static str {
    "ok"
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "uptimeSeconds": state.start_time.elapsed().as_secs(),
        "connectedAgents": state.registry.snapshot_connected_nodes().len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
