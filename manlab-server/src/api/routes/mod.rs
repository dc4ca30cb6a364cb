//! API route modules.
//!
//! Organizes routes by resource type.

pub mod agent_ws;
pub mod audit;
pub mod dashboard_ws;
pub mod devices;
pub mod downloads;
pub mod file_browser;
pub mod health;
pub mod log_viewer;
pub mod onboarding;
pub mod script_runs;
pub mod system_settings;
pub mod terminal;
pub mod updates;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
///
/// - `/api/agent/ws` — the agent hub channel (token auth inside the frame)
/// - `/api/dashboard/ws` — dashboard event fan-out (JWT via query param)
/// - Everything else — dashboard REST surface (JWT via bearer header)
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/health", health::router())
        .nest("/api/agent", agent_ws::router())
        .nest("/api/dashboard", dashboard_ws::router())
        .nest("/api/devices", devices::router())
        .nest("/api/devices/{node_id}/terminal", terminal::router())
        .nest(
            "/api/devices/{node_id}/log-viewer-sessions",
            log_viewer::router(),
        )
        .nest(
            "/api/devices/{node_id}/file-browser-sessions",
            file_browser::router(),
        )
        .nest("/api/devices/{node_id}/downloads", downloads::device_router())
        .nest("/api/downloads", downloads::router())
        .nest("/api/devices/{node_id}/script-runs", script_runs::device_router())
        .nest("/api/script-runs", script_runs::router())
        .nest("/api/onboarding", onboarding::router())
        .nest("/api/updates", updates::router())
        .nest("/api/settings", system_settings::router())
        .nest("/api/audit", audit::router())
        .with_state(state)
}
