//! Command dispatch: queued commands onto live connections.
//!
//! The dispatcher moves commands from Queued to Sent by sending
//! `ExecuteCommand` to the currently-bound connection. Send failures are
//! swallowed; the command stays queued and the next reconnect replay (or the
//! next enqueue) picks it up.

pub mod waiter;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use agent_proto::{CommandType, ServerMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::models::CommandQueueItemDbModel;
use crate::database::repositories::CommandQueueRepository;
use crate::hub::connections::ConnectionMap;
use crate::registry::ConnectionRegistry;
use crate::{Error, Result};

pub use waiter::{CompletionWaiter, WaiterConfig};

/// Dispatches queued commands over the hub.
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    connections: Arc<ConnectionMap>,
    commands: Arc<dyn CommandQueueRepository>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        connections: Arc<ConnectionMap>,
        commands: Arc<dyn CommandQueueRepository>,
    ) -> Self {
        Self {
            registry,
            connections,
            commands,
        }
    }

    /// Enqueue a command and attempt an immediate dispatch to the bound
    /// connection. Returns the new command id. The command is durable
    /// regardless of whether the immediate send succeeded.
    pub async fn enqueue_and_dispatch(
        &self,
        node_id: &str,
        command_type: CommandType,
        payload: serde_json::Value,
    ) -> Result<String> {
        // The wire contract is crisp: payloads match their static schema or
        // nothing is queued.
        agent_proto::payload::validate_payload(command_type, &payload)
            .map_err(|e| Error::validation(format!("invalid {} payload: {}", command_type, e)))?;

        let command_id = self.commands.enqueue(node_id, command_type, &payload).await?;

        let sent = self
            .try_send(node_id, &command_id, command_type, payload)
            .await;
        if sent {
            // Queued→Sent is not required before completion; a synchronous
            // agent may already have completed the command.
            let _ = self.commands.mark_sent(&command_id).await?;
        } else {
            debug!(node_id, command_id, "Target not connected; command stays queued");
        }

        Ok(command_id)
    }

    /// Replay all outstanding commands for a node after (re)connect.
    ///
    /// Issues one `ReplayPending` with every Queued or Sent command id, then
    /// re-sends `ExecuteCommand` for each; the agent deduplicates by id.
    pub async fn replay_for_node(&self, node_id: &str) -> Result<usize> {
        let pending = self.commands.list_pending(node_id).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let ids: Vec<Uuid> = pending
            .iter()
            .filter_map(|item| Uuid::parse_str(&item.id).ok())
            .collect();

        let Some(connection_id) = self.registry.get(node_id) else {
            return Ok(0);
        };

        self.connections
            .send(&connection_id, ServerMessage::ReplayPending { command_ids: ids })
            .await;

        let mut replayed = 0;
        for item in pending {
            if self.send_item(&connection_id, &item).await {
                replayed += 1;
                let _ = self.commands.mark_sent(&item.id).await?;
            }
        }

        debug!(node_id, replayed, "Replayed outstanding commands");
        Ok(replayed)
    }

    /// Sweep queued commands across all connected nodes and dispatch them.
    ///
    /// Catches commands whose immediate dispatch was lost without a
    /// reconnect (the replay path covers reconnects). Uses the registry's
    /// cached snapshot so the sweep stays cheap.
    pub async fn redispatch_connected(&self) -> Result<usize> {
        let connected = self.registry.snapshot_connected_nodes();
        let items = self
            .commands
            .list_undispatched_for_connected(&connected)
            .await?;

        let mut dispatched = 0;
        for item in items {
            let Some(connection_id) = self.registry.get(&item.node_id) else {
                continue;
            };
            if self.send_item(&connection_id, &item).await {
                dispatched += 1;
                let _ = self.commands.mark_sent(&item.id).await?;
            }
        }

        if dispatched > 0 {
            debug!(dispatched, "Redispatch sweep sent stalled commands");
        }
        Ok(dispatched)
    }

    /// Spawn the periodic redispatch sweep.
    pub fn start_redispatch_loop(
        self: &Arc<Self>,
        interval: Duration,
        cancel_token: CancellationToken,
    ) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = dispatcher.redispatch_connected().await {
                            warn!(error = %e, "Redispatch sweep failed");
                        }
                    }
                }
            }
        });
    }

    /// Best-effort cancel: sends `command.cancel` for the target command to
    /// the node's current connection. Returns false when the node is not
    /// connected.
    pub async fn send_cancel(&self, node_id: &str, target_command_id: Uuid) -> bool {
        let Some(connection_id) = self.registry.get(node_id) else {
            return false;
        };
        self.connections
            .send(
                &connection_id,
                ServerMessage::ExecuteCommand {
                    command_id: Uuid::new_v4(),
                    command_type: CommandType::CommandCancel,
                    payload: serde_json::json!({ "targetCommandId": target_command_id }),
                },
            )
            .await
    }

    async fn try_send(
        &self,
        node_id: &str,
        command_id: &str,
        command_type: CommandType,
        payload: serde_json::Value,
    ) -> bool {
        let Some(connection_id) = self.registry.get(node_id) else {
            return false;
        };
        let Ok(command_id) = Uuid::parse_str(command_id) else {
            return false;
        };
        self.connections
            .send(
                &connection_id,
                ServerMessage::ExecuteCommand {
                    command_id,
                    command_type,
                    payload,
                },
            )
            .await
    }

    async fn send_item(&self, connection_id: &str, item: &CommandQueueItemDbModel) -> bool {
        let Ok(command_id) = Uuid::parse_str(&item.id) else {
            warn!(id = %item.id, "Skipping command with malformed id");
            return false;
        };
        let Ok(command_type) = CommandType::from_str(&item.command_type) else {
            warn!(id = %item.id, tag = %item.command_type, "Skipping command with unknown type");
            return false;
        };
        let payload: serde_json::Value = match serde_json::from_str(&item.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(id = %item.id, error = %e, "Skipping command with corrupt payload");
                return false;
            }
        };
        self.connections
            .send(
                connection_id,
                ServerMessage::ExecuteCommand {
                    command_id,
                    command_type,
                    payload,
                },
            )
            .await
    }
}
