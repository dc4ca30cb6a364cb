//! The agent hub: one bidirectional channel per connected agent.
//!
//! Each WebSocket connection authenticates with its first frame, binds into
//! the connection registry, gets its outstanding commands replayed, and then
//! settles into an event-driven read loop. Control frames are JSON; stream
//! chunks arrive as binary frames and are routed into per-stream channels.

pub mod connections;

use std::sync::Arc;
use std::time::Duration;

use agent_proto::{AgentIdentity, AgentMessage, ChunkFrame, CommandStatus, ServerMessage};
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::AuditQueue;
use crate::crypto;
use crate::database::models::{NodeDbModel, NodeSettingsDbModel, NodeStatus, ScriptRunStatus};
use crate::database::repositories::{
    CommandQueueRepository, NodeRepository, OnboardingRepository, ScriptRepository,
    SettingsRepository,
};
use crate::dispatch::Dispatcher;
use crate::notification::{
    DashboardEvent, EventBroadcaster, NotificationEvent, NotificationService,
};
use crate::registry::ConnectionRegistry;
use crate::streaming::router::{DeliverOutcome, StreamRouter};
use crate::{Error, Result};

pub use connections::{ConnectionMap, OUTBOUND_QUEUE_CAPACITY};

/// How long a fresh connection may take to present its Enroll frame.
const ENROLL_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries for enrollment row creation on store conflicts.
const ENROLL_CREATE_RETRIES: usize = 3;

/// The agent hub.
pub struct AgentHub {
    registry: Arc<ConnectionRegistry>,
    connections: Arc<ConnectionMap>,
    dispatcher: Arc<Dispatcher>,
    streams: Arc<StreamRouter>,
    nodes: Arc<dyn NodeRepository>,
    commands: Arc<dyn CommandQueueRepository>,
    scripts: Arc<dyn ScriptRepository>,
    onboarding: Arc<dyn OnboardingRepository>,
    settings: Arc<dyn SettingsRepository>,
    broadcaster: EventBroadcaster,
    notifications: Arc<NotificationService>,
    audit: AuditQueue,
}

/// Outcome of authenticating a connection's first frame.
struct AuthOutcome {
    node: NodeDbModel,
    /// Present only when this connection just enrolled a new node.
    minted_key: Option<String>,
}

impl AgentHub {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        connections: Arc<ConnectionMap>,
        dispatcher: Arc<Dispatcher>,
        streams: Arc<StreamRouter>,
        nodes: Arc<dyn NodeRepository>,
        commands: Arc<dyn CommandQueueRepository>,
        scripts: Arc<dyn ScriptRepository>,
        onboarding: Arc<dyn OnboardingRepository>,
        settings: Arc<dyn SettingsRepository>,
        broadcaster: EventBroadcaster,
        notifications: Arc<NotificationService>,
        audit: AuditQueue,
    ) -> Self {
        Self {
            registry,
            connections,
            dispatcher,
            streams,
            nodes,
            commands,
            scripts,
            onboarding,
            settings,
            broadcaster,
            notifications,
            audit,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn streams(&self) -> &Arc<StreamRouter> {
        &self.streams
    }

    /// Drive one agent connection to completion.
    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote_addr: Option<String>) {
        let (mut sink, mut stream) = socket.split();

        // The first frame must be Enroll, within the deadline.
        let first = tokio::time::timeout(ENROLL_TIMEOUT, stream.next()).await;
        let auth = match first {
            Ok(Some(Ok(Message::Text(text)))) => {
                match AgentMessage::from_json(&text) {
                    Ok(AgentMessage::Enroll {
                        auth_token,
                        agent_identity,
                    }) => {
                        self.authenticate(&auth_token, &agent_identity, remote_addr.as_deref())
                            .await
                    }
                    Ok(_) => Err(Error::forbidden("first frame must be Enroll")),
                    Err(e) => {
                        warn!(error = %e, "Malformed enroll frame");
                        Err(Error::forbidden("malformed enroll frame"))
                    }
                }
            }
            Ok(Some(Ok(_))) => Err(Error::forbidden("first frame must be Enroll")),
            Ok(_) => Err(Error::forbidden("connection closed before enroll")),
            Err(_) => Err(Error::forbidden("enroll deadline exceeded")),
        };

        let AuthOutcome { node, minted_key } = match auth {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(error = %e, "Agent connection rejected");
                let _ = sink.close().await;
                return;
            }
        };

        let node_id = node.id.clone();
        let connection_id = Uuid::new_v4().to_string();
        info!(node_id, connection_id, hostname = %node.hostname, "Agent connected");

        // Outbound forwarder: everything the server sends goes through this
        // queue so nothing else touches the sink.
        let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_CAPACITY);
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let frame = Message::Text(message.to_json().into());
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        self.registry.bind(&node_id, &connection_id);
        self.connections.insert(&connection_id, tx);

        self.mark_online(&node).await;
        self.connections
            .send(
                &connection_id,
                ServerMessage::EnrollAck {
                    node_id: Uuid::parse_str(&node_id).unwrap_or_default(),
                    auth_key: minted_key,
                },
            )
            .await;

        // At-least-once delivery: everything still outstanding goes out now.
        if let Err(e) = self.dispatcher.replay_for_node(&node_id).await {
            warn!(node_id, error = %e, "Reconnect replay failed");
        }

        // Event-driven read loop: one dispatch per inbound message.
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => match AgentMessage::from_json(&text) {
                    Ok(message) => {
                        if let Err(e) = self.handle_message(&node_id, message).await {
                            warn!(node_id, error = %e, "Failed to handle agent message");
                        }
                    }
                    Err(e) => {
                        warn!(node_id, error = %e, "Malformed agent frame; closing connection");
                        break;
                    }
                },
                Ok(Message::Binary(bytes)) => match ChunkFrame::decode(bytes) {
                    Ok(chunk) => {
                        let outcome = self
                            .streams
                            .deliver_chunk(chunk.stream_id, chunk.bytes)
                            .await;
                        if outcome == DeliverOutcome::Unknown {
                            debug!(stream_id = %chunk.stream_id, "Chunk for unknown stream dropped");
                        }
                    }
                    Err(e) => {
                        warn!(node_id, error = %e, "Malformed chunk frame; closing connection");
                        break;
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ping/pong handled by axum
                Err(e) => {
                    debug!(node_id, error = %e, "Agent socket error");
                    break;
                }
            }
        }

        // Teardown.
        self.connections.remove(&connection_id);
        self.streams.cancel_for_connection(&connection_id);
        writer.abort();

        if let Some(unbound_node) = self.registry.remove_by_connection(&connection_id) {
            info!(node_id = unbound_node, connection_id, "Agent disconnected");
            self.mark_offline(&unbound_node).await;
        } else {
            // A newer connection superseded this one; nothing to unbind.
            debug!(node_id, connection_id, "Stale connection closed");
        }
    }

    /// Authenticate the presented token: a known node auth key, or a
    /// one-shot enrollment token that creates the node.
    async fn authenticate(
        &self,
        auth_token: &str,
        identity: &AgentIdentity,
        remote_addr: Option<&str>,
    ) -> Result<AuthOutcome> {
        let token_hash = crypto::hash_auth_key(auth_token);

        if let Some(node) = self.nodes.get_by_auth_hash(&token_hash).await? {
            let ip = identity.ip_address.as_deref().or(remote_addr);
            self.nodes
                .update_identity(
                    &node.id,
                    &identity.hostname,
                    &identity.os,
                    &identity.agent_version,
                    ip,
                )
                .await?;
            let node = self.nodes.get(&node.id).await?;
            return Ok(AuthOutcome {
                node,
                minted_key: None,
            });
        }

        // Unknown key: maybe a one-shot enrollment token.
        let Some(_machine) = self.onboarding.consume(&token_hash).await? else {
            return Err(Error::forbidden("unknown auth token"));
        };

        let auth_key = crypto::generate_auth_key();
        let node = self.enroll_node(identity, &auth_key, remote_addr).await?;

        self.settings
            .upsert_node_settings(&NodeSettingsDbModel::defaults(&node.id))
            .await?;

        self.audit.record(
            "node.enrolled",
            "node",
            "system",
            Some(node.id.clone()),
            true,
            format!("{} enrolled", node.hostname),
        );
        self.notifications
            .notify(NotificationEvent::NodeEnrolled {
                node_id: node.id.clone(),
                hostname: node.hostname.clone(),
                timestamp: Utc::now(),
            })
            .await;

        Ok(AuthOutcome {
            node,
            minted_key: Some(auth_key),
        })
    }

    async fn enroll_node(
        &self,
        identity: &AgentIdentity,
        auth_key: &str,
        remote_addr: Option<&str>,
    ) -> Result<NodeDbModel> {
        let mut last_err = None;
        for _ in 0..ENROLL_CREATE_RETRIES {
            let node = NodeDbModel {
                id: Uuid::new_v4().to_string(),
                hostname: identity.hostname.clone(),
                os: identity.os.clone(),
                status: NodeStatus::Online.as_str().to_string(),
                last_seen: Some(Utc::now().to_rfc3339()),
                agent_version: identity.agent_version.clone(),
                auth_key_hash: crypto::hash_auth_key(auth_key),
                ip_address: identity
                    .ip_address
                    .clone()
                    .or_else(|| remote_addr.map(str::to_string)),
                created_at: Utc::now().to_rfc3339(),
            };
            match self.nodes.create(&node).await {
                Ok(()) => return Ok(node),
                Err(e) => {
                    warn!(error = %e, "Node insert conflicted; retrying");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Database("enrollment failed".to_string())))
    }

    /// Handle one inbound control message.
    async fn handle_message(&self, node_id: &str, message: AgentMessage) -> Result<()> {
        match message {
            AgentMessage::Enroll { .. } => {
                // Already authenticated; a second enroll is noise.
                debug!(node_id, "Ignoring repeated Enroll frame");
                Ok(())
            }
            AgentMessage::Heartbeat(_stats) => {
                // last_seen is stamped with server receipt time; the agent's
                // own clock only matters inside its telemetry.
                let seen_at = Utc::now();
                let was = self.nodes.get(node_id).await?.status();
                self.nodes.record_heartbeat(node_id, seen_at).await?;
                if was == Some(NodeStatus::Offline) {
                    self.broadcast_status(node_id, NodeStatus::Online, Some(seen_at))
                        .await;
                }
                Ok(())
            }
            AgentMessage::Telemetry(snapshot) => {
                self.nodes
                    .update_identity(
                        node_id,
                        &snapshot.hostname,
                        &snapshot.os,
                        &snapshot.agent_version,
                        snapshot.ip_address.as_deref(),
                    )
                    .await?;
                self.nodes.record_heartbeat(node_id, Utc::now()).await?;
                Ok(())
            }
            AgentMessage::CommandResult {
                command_id,
                status,
                output_tail,
            } => {
                self.handle_command_result(node_id, command_id, status, &output_tail)
                    .await
            }
            AgentMessage::StreamEnd { stream_id, error } => {
                self.streams.finish(stream_id, error).await;
                Ok(())
            }
        }
    }

    async fn handle_command_result(
        &self,
        node_id: &str,
        command_id: Uuid,
        status: CommandStatus,
        output_tail: &str,
    ) -> Result<()> {
        let command_id = command_id.to_string();

        // Results must come from the node the command targets.
        let item = self.commands.get(&command_id).await?;
        if item.node_id != node_id {
            warn!(
                node_id,
                command_id,
                owner = %item.node_id,
                "Dropping command result from wrong node"
            );
            return Ok(());
        }

        let applied = self.commands.complete(&command_id, status, output_tail).await?;
        if !applied {
            return Ok(());
        }

        // Script runs ride the queue; mirror the terminal state onto the run.
        if let Some(run) = self.scripts.get_run_by_command(&command_id).await? {
            let run_status = match status {
                CommandStatus::Success => ScriptRunStatus::Success,
                CommandStatus::Failed => ScriptRunStatus::Failed,
            };
            let _ = self
                .scripts
                .set_run_status(&run.id, run_status, Some(output_tail))
                .await?;
        }

        Ok(())
    }

    async fn mark_online(&self, node: &NodeDbModel) {
        if let Err(e) = self.nodes.record_heartbeat(&node.id, Utc::now()).await {
            warn!(node_id = %node.id, error = %e, "Failed to record connect heartbeat");
            return;
        }
        if node.status() != Some(NodeStatus::Online) {
            self.broadcast_status(&node.id, NodeStatus::Online, Some(Utc::now()))
                .await;
        }
    }

    async fn mark_offline(&self, node_id: &str) {
        match self.nodes.get(node_id).await {
            Ok(node) if node.status() == Some(NodeStatus::Maintenance) => {}
            Ok(node) => {
                if let Err(e) = self.nodes.set_status(node_id, NodeStatus::Offline).await {
                    warn!(node_id, error = %e, "Failed to mark node offline");
                    return;
                }
                self.broadcast_status(node_id, NodeStatus::Offline, node.last_seen_at())
                    .await;
                self.audit.record(
                    "node.disconnected",
                    "node",
                    "system",
                    Some(node_id.to_string()),
                    true,
                    format!("{} disconnected", node.hostname),
                );
            }
            Err(e) => warn!(node_id, error = %e, "Failed to load node on disconnect"),
        }
    }

    async fn broadcast_status(
        &self,
        node_id: &str,
        status: NodeStatus,
        last_seen: Option<chrono::DateTime<Utc>>,
    ) {
        self.broadcaster.broadcast(DashboardEvent::NodeStatusChanged {
            node_id: node_id.to_string(),
            status: status.as_str().to_string(),
            last_seen,
        });
    }
}
