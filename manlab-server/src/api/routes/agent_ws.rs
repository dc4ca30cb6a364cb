//! Agent hub WebSocket endpoint.
//!
//! Authentication happens inside the channel: the first frame must be an
//! `Enroll` message carrying the node auth key or a one-shot enrollment
//! token.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{ConnectInfo, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};

use crate::api::server::AppState;

/// Create the agent WebSocket router.
pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(agent_ws))
}

async fn agent_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let remote_addr = Some(addr.ip().to_string());
    let hub = Arc::clone(&state.hub);
    ws.on_upgrade(move |socket| hub.handle_socket(socket, remote_addr))
}
