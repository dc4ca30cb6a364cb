//! Dashboard event WebSocket.
//!
//! Dashboards subscribe here for `NodeStatusChanged`, `PendingUpdateCreated`,
//! and download progress events. Media elements and WebSocket clients cannot
//! set headers, so the JWT rides a query parameter.

use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::api::error::ApiError;
use crate::api::server::AppState;
use crate::notification::DashboardEvent;

/// Query parameters for WebSocket connection (JWT token).
#[derive(Debug, Deserialize)]
pub struct WsAuthParams {
    pub token: Option<String>,
}

/// Create the dashboard WebSocket router.
pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(dashboard_ws))
}

async fn dashboard_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(auth): Query<WsAuthParams>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(jwt_service) = &state.jwt_service {
        let token = auth
            .token
            .ok_or_else(|| ApiError::unauthorized("Missing token query parameter"))?;
        jwt_service
            .validate_token(&token)
            .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;
    }

    let receiver = state.broadcaster.subscribe();
    Ok(ws.on_upgrade(move |socket| pump_events(socket, receiver)))
}

async fn pump_events(socket: WebSocket, mut receiver: broadcast::Receiver<DashboardEvent>) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = receiver.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!(skipped = n, "Dashboard socket lagged behind event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Dashboards send nothing meaningful; drop other frames.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}
