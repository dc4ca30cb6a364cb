//! Health monitor: offline detection and fan-out.
//!
//! Every tick, Online nodes whose last heartbeat is older than the offline
//! threshold are flipped to Offline, and the change fans out to the
//! dashboard group, the audit trail, and the notification channels.
//! Maintenance nodes are never auto-transitioned; a node whose heartbeat
//! resumes is flipped back Online by the hub's heartbeat handler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::AuditQueue;
use crate::database::models::NodeStatus;
use crate::database::repositories::NodeRepository;
use crate::notification::{
    DashboardEvent, EventBroadcaster, NotificationEvent, NotificationService,
};

/// Health monitor tuning.
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Delay before the first tick.
    pub initial_delay: Duration,
    /// Tick interval.
    pub check_interval: Duration,
    /// Silence threshold before an Online node is marked Offline.
    pub offline_threshold: Duration,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            check_interval: Duration::from_secs(30),
            offline_threshold: Duration::from_secs(2 * 60),
        }
    }
}

/// Periodic worker marking silent nodes offline.
pub struct HealthMonitor {
    nodes: Arc<dyn NodeRepository>,
    broadcaster: EventBroadcaster,
    notifications: Arc<NotificationService>,
    audit: AuditQueue,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        broadcaster: EventBroadcaster,
        notifications: Arc<NotificationService>,
        audit: AuditQueue,
    ) -> Self {
        Self::with_config(
            nodes,
            broadcaster,
            notifications,
            audit,
            HealthMonitorConfig::default(),
        )
    }

    pub fn with_config(
        nodes: Arc<dyn NodeRepository>,
        broadcaster: EventBroadcaster,
        notifications: Arc<NotificationService>,
        audit: AuditQueue,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            nodes,
            broadcaster,
            notifications,
            audit,
            config,
        }
    }

    /// Spawn the monitor loop.
    pub fn start(self: Arc<Self>, cancel_token: CancellationToken) {
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel_token.cancelled() => return,
                _ = tokio::time::sleep(self.config.initial_delay) => {}
            }

            let mut interval = tokio::time::interval(self.config.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Health monitor shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = %e, "Health monitor tick failed");
                        }
                    }
                }
            }
        });
    }

    /// One tick: transition every silent Online node. Returns how many
    /// nodes went offline.
    pub async fn run_once(&self) -> crate::Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.offline_threshold)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let silent = self.nodes.list_online_silent_since(cutoff).await?;

        let mut transitioned = 0;
        for node in silent {
            // Maintenance nodes are excluded by the query (status filter),
            // but re-check in case the status moved under us.
            if node.status() == Some(NodeStatus::Maintenance) {
                continue;
            }

            if !self.nodes.set_status(&node.id, NodeStatus::Offline).await? {
                continue;
            }
            transitioned += 1;

            let last_seen = node.last_seen_at();
            info!(node_id = %node.id, hostname = %node.hostname, "Node marked offline");

            self.broadcaster.broadcast(DashboardEvent::NodeStatusChanged {
                node_id: node.id.clone(),
                status: NodeStatus::Offline.as_str().to_string(),
                last_seen,
            });

            self.audit.record(
                "node.offline",
                "node",
                "system",
                Some(node.id.clone()),
                true,
                format!("{} missed heartbeats", node.hostname),
            );

            self.notifications
                .notify(NotificationEvent::NodeOffline {
                    node_id: node.id.clone(),
                    hostname: node.hostname.clone(),
                    last_seen,
                    timestamp: Utc::now(),
                })
                .await;
        }

        Ok(transitioned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;
    use crate::database::models::NodeDbModel;
    use crate::database::repositories::{SqlxAuditRepository, SqlxNodeRepository};
    use crate::notification::NotificationChannel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        sent: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        fn channel_type(&self) -> &'static str {
            "counting"
        }
        fn is_enabled(&self) -> bool {
            true
        }
        async fn send(&self, _event: &NotificationEvent) -> crate::Result<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn seed_node(nodes: &dyn NodeRepository, id: &str, status: NodeStatus, age_secs: i64) {
        nodes
            .create(&NodeDbModel {
                id: id.to_string(),
                hostname: format!("host-{id}"),
                os: String::new(),
                status: status.as_str().to_string(),
                last_seen: Some((Utc::now() - chrono::Duration::seconds(age_secs)).to_rfc3339()),
                agent_version: String::new(),
                auth_key_hash: format!("hash-{id}"),
                ip_address: None,
                created_at: Utc::now().to_rfc3339(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_silent_node_goes_offline_with_fanout() {
        let pool = init_memory_pool().await.unwrap();
        let nodes: Arc<dyn NodeRepository> = Arc::new(SqlxNodeRepository::new(pool.clone()));

        seed_node(nodes.as_ref(), "stale", NodeStatus::Online, 121).await;
        seed_node(nodes.as_ref(), "fresh", NodeStatus::Online, 10).await;
        seed_node(nodes.as_ref(), "pinned", NodeStatus::Maintenance, 999).await;

        let sent = Arc::new(AtomicUsize::new(0));
        let broadcaster = EventBroadcaster::new();
        let mut events = broadcaster.subscribe();
        let monitor = HealthMonitor::new(
            Arc::clone(&nodes),
            broadcaster,
            Arc::new(NotificationService::new(vec![Arc::new(CountingChannel {
                sent: Arc::clone(&sent),
            })])),
            AuditQueue::start(
                Arc::new(SqlxAuditRepository::new(pool)),
                CancellationToken::new(),
            ),
        );

        let transitioned = monitor.run_once().await.unwrap();
        assert_eq!(transitioned, 1);

        assert_eq!(
            nodes.get("stale").await.unwrap().status(),
            Some(NodeStatus::Offline)
        );
        assert_eq!(
            nodes.get("fresh").await.unwrap().status(),
            Some(NodeStatus::Online)
        );
        assert_eq!(
            nodes.get("pinned").await.unwrap().status(),
            Some(NodeStatus::Maintenance)
        );

        // Fan-out fired exactly once.
        assert_eq!(sent.load(Ordering::SeqCst), 1);
        match events.try_recv().unwrap() {
            DashboardEvent::NodeStatusChanged { node_id, status, .. } => {
                assert_eq!(node_id, "stale");
                assert_eq!(status, "OFFLINE");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(events.try_recv().is_err());

        // A second tick does not re-fire for the already-offline node.
        let transitioned = monitor.run_once().await.unwrap();
        assert_eq!(transitioned, 0);
        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }
}
