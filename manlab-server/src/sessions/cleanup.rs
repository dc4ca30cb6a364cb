//! Session cleanup worker.
//!
//! Periodically sweeps the session caches, marks expired sessions, and
//! best-effort enqueues `terminal.close` for expired terminal sessions so
//! the agent tears down its shell.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{SessionKind, SessionService};
use crate::dispatch::Dispatcher;

/// Sweep interval.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// How long dead sessions linger in the cache for status queries.
const DEAD_SESSION_GRACE: Duration = Duration::from_secs(10 * 60);

/// Background worker driving session expiry.
pub struct SessionCleanupWorker {
    sessions: Arc<SessionService>,
    dispatcher: Arc<Dispatcher>,
}

impl SessionCleanupWorker {
    pub fn new(sessions: Arc<SessionService>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            sessions,
            dispatcher,
        }
    }

    /// Spawn the worker loop.
    pub fn start(self, cancel_token: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Session cleanup worker shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        self.run_once().await;
                    }
                }
            }
        });
    }

    /// One sweep pass.
    pub async fn run_once(&self) {
        let expired = self.sessions.sweep(DEAD_SESSION_GRACE).await;
        for session in expired {
            debug!(session_id = %session.id, kind = ?session.kind, "Session expired");
            if session.kind != SessionKind::Terminal {
                continue;
            }
            // Best-effort: the agent also times sessions out on its own.
            let result = self
                .dispatcher
                .enqueue_and_dispatch(
                    &session.node_id,
                    agent_proto::CommandType::TerminalClose,
                    serde_json::json!({ "sessionId": session.id }),
                )
                .await;
            if let Err(e) = result {
                warn!(session_id = %session.id, error = %e, "Failed to enqueue terminal.close");
            }
        }
    }
}
