//! Agent auto-update job.
//!
//! For every Online node with auto-update enabled and inside its
//! maintenance window, consult the release catalog; in automatic mode the
//! reinstall runs over SSH, in manual mode a pending version is recorded
//! for operator approval. Five consecutive failures disable auto-update on
//! the node.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::{JobSummary, JobTrigger, ScheduledJob};
use crate::audit::AuditQueue;
use crate::database::models::{NodeStatus, UpdateApproval};
use crate::database::repositories::{NodeRepository, SettingsRepository};
use crate::notification::{
    DashboardEvent, EventBroadcaster, NotificationEvent, NotificationService,
};
use crate::scheduler::catalog::ReleaseCatalog;
use crate::scheduler::ssh::SshCollaborator;
use crate::Result;

/// Consecutive failures after which auto-update turns itself off.
const MAX_CONSECUTIVE_FAILURES: i64 = 5;

/// The agent auto-update control loop.
pub struct AgentUpdateJob {
    nodes: Arc<dyn NodeRepository>,
    settings: Arc<dyn SettingsRepository>,
    catalog: Arc<ReleaseCatalog>,
    ssh: Arc<dyn SshCollaborator>,
    broadcaster: EventBroadcaster,
    notifications: Arc<NotificationService>,
    audit: AuditQueue,
}

impl AgentUpdateJob {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        settings: Arc<dyn SettingsRepository>,
        catalog: Arc<ReleaseCatalog>,
        ssh: Arc<dyn SshCollaborator>,
        broadcaster: EventBroadcaster,
        notifications: Arc<NotificationService>,
        audit: AuditQueue,
    ) -> Self {
        Self {
            nodes,
            settings,
            catalog,
            ssh,
            broadcaster,
            notifications,
            audit,
        }
    }
}

#[async_trait]
impl ScheduledJob for AgentUpdateJob {
    fn name(&self) -> &'static str {
        "agent-auto-update"
    }

    async fn run_once(&self, trigger: JobTrigger) -> Result<JobSummary> {
        let now = Utc::now();
        let mut summary = JobSummary::default();

        for node in self.nodes.list_by_status(NodeStatus::Online).await? {
            let node_settings = self.settings.get_node_settings(&node.id).await?;
            if !node_settings.auto_update_enabled
                || !node_settings.in_maintenance_window(now)
                || node_settings.auto_update_failures >= MAX_CONSECUTIVE_FAILURES
            {
                continue;
            }
            summary.matched_nodes += 1;

            let Some(version) = self.catalog.newest_above(&node.agent_version).await else {
                debug!(node_id = %node.id, current = %node.agent_version, "Agent is current");
                continue;
            };

            // Approval mode travels with the job data, resolved per node.
            match node_settings.approval() {
                UpdateApproval::Automatic => {
                    match self.ssh.reinstall_agent(&node, &version).await {
                        Ok(()) => {
                            summary.actions += 1;
                            info!(node_id = %node.id, version, "Agent reinstall triggered");
                            self.settings.reset_auto_update_failures(&node.id).await?;
                            self.audit.record(
                                "agent.update.triggered",
                                "update",
                                trigger.actor(),
                                Some(node.id.clone()),
                                true,
                                format!("{} → {}", node.agent_version, version),
                            );
                        }
                        Err(e) => {
                            warn!(node_id = %node.id, error = %e, "Agent reinstall failed");
                            let failures =
                                self.settings.record_auto_update_failure(&node.id).await?;
                            self.audit.record(
                                "agent.update.failed",
                                "update",
                                trigger.actor(),
                                Some(node.id.clone()),
                                false,
                                e.to_string(),
                            );
                            if failures >= MAX_CONSECUTIVE_FAILURES {
                                self.settings.disable_auto_update(&node.id).await?;
                                self.notifications
                                    .notify(NotificationEvent::AutoUpdateDisabled {
                                        node_id: node.id.clone(),
                                        hostname: node.hostname.clone(),
                                        consecutive_failures: failures,
                                        timestamp: Utc::now(),
                                    })
                                    .await;
                            }
                        }
                    }
                }
                UpdateApproval::Manual => {
                    if node_settings.pending_agent_version.as_deref() == Some(version.as_str()) {
                        continue;
                    }
                    summary.actions += 1;
                    self.settings
                        .set_pending_agent_version(&node.id, Some(&version))
                        .await?;
                    self.broadcaster.broadcast(DashboardEvent::PendingUpdateCreated {
                        node_id: node.id.clone(),
                        version: version.clone(),
                    });
                    self.notifications
                        .notify(NotificationEvent::PendingAgentUpdate {
                            node_id: node.id.clone(),
                            hostname: node.hostname.clone(),
                            version: version.clone(),
                            timestamp: Utc::now(),
                        })
                        .await;
                    self.audit.record(
                        "agent.update.pending",
                        "update",
                        trigger.actor(),
                        Some(node.id.clone()),
                        true,
                        format!("pending version {}", version),
                    );
                }
            }
        }

        // Operator visibility: manual triggers always leave a trace, even
        // with nothing to do.
        if trigger.is_manual() {
            self.audit.record(
                "agent.update.check",
                "update",
                trigger.actor(),
                None,
                true,
                format!(
                    "manual check: {} matching nodes, {} actions",
                    summary.matched_nodes, summary.actions
                ),
            );
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;
    use crate::database::models::{NodeDbModel, NodeSettingsDbModel};
    use crate::database::repositories::{
        SqlxAuditRepository, SqlxNodeRepository, SqlxSettingsRepository,
    };
    use crate::scheduler::catalog::ReleaseCatalogConfig;
    use crate::{Error, Result};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct FlakySsh {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl SshCollaborator for FlakySsh {
        async fn reinstall_agent(&self, _node: &NodeDbModel, _version: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Other("ssh unreachable".to_string()))
            } else {
                Ok(())
            }
        }

        async fn list_available_updates(
            &self,
            _node: &NodeDbModel,
        ) -> Result<Vec<crate::scheduler::PackageUpdate>> {
            Ok(Vec::new())
        }

        async fn apply_updates(&self, _node: &NodeDbModel, _packages: &[String]) -> Result<bool> {
            Ok(false)
        }
    }

    struct Fixture {
        job: AgentUpdateJob,
        nodes: Arc<dyn NodeRepository>,
        settings: Arc<dyn SettingsRepository>,
        ssh_calls: Arc<FlakySsh>,
        broadcaster: EventBroadcaster,
    }

    async fn fixture(fail_ssh: bool, approval: UpdateApproval) -> Fixture {
        let pool = init_memory_pool().await.unwrap();
        let nodes: Arc<dyn NodeRepository> = Arc::new(SqlxNodeRepository::new(pool.clone()));
        let settings: Arc<dyn SettingsRepository> =
            Arc::new(SqlxSettingsRepository::new(pool.clone()));

        nodes
            .create(&NodeDbModel {
                id: "n1".to_string(),
                hostname: "web-01".to_string(),
                os: String::new(),
                status: NodeStatus::Online.as_str().to_string(),
                last_seen: Some(Utc::now().to_rfc3339()),
                agent_version: "1.0.0".to_string(),
                auth_key_hash: "h".to_string(),
                ip_address: None,
                created_at: Utc::now().to_rfc3339(),
            })
            .await
            .unwrap();

        let mut node_settings = NodeSettingsDbModel::defaults("n1");
        node_settings.auto_update_enabled = true;
        node_settings.auto_update_approval = approval.as_str().to_string();
        settings.upsert_node_settings(&node_settings).await.unwrap();

        let ssh = Arc::new(FlakySsh {
            calls: AtomicUsize::new(0),
            fail: fail_ssh,
        });
        let broadcaster = EventBroadcaster::new();
        let job = AgentUpdateJob::new(
            Arc::clone(&nodes),
            Arc::clone(&settings),
            Arc::new(ReleaseCatalog::new(ReleaseCatalogConfig {
                local_versions: vec!["1.1.0".to_string()],
                github_repo: None,
            })),
            Arc::clone(&ssh) as Arc<dyn SshCollaborator>,
            broadcaster.clone(),
            Arc::new(NotificationService::disabled()),
            AuditQueue::start(
                Arc::new(SqlxAuditRepository::new(pool)),
                CancellationToken::new(),
            ),
        );

        Fixture {
            job,
            nodes,
            settings,
            ssh_calls: ssh,
            broadcaster,
        }
    }

    #[tokio::test]
    async fn test_automatic_mode_triggers_reinstall() {
        let f = fixture(false, UpdateApproval::Automatic).await;
        let summary = f.job.run_once(JobTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.matched_nodes, 1);
        assert_eq!(summary.actions, 1);
        assert_eq!(f.ssh_calls.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_manual_mode_records_pending_and_broadcasts() {
        let f = fixture(false, UpdateApproval::Manual).await;
        let mut events = f.broadcaster.subscribe();

        let summary = f.job.run_once(JobTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.actions, 1);
        assert_eq!(f.ssh_calls.calls.load(Ordering::SeqCst), 0);

        let settings = f.settings.get_node_settings("n1").await.unwrap();
        assert_eq!(settings.pending_agent_version.as_deref(), Some("1.1.0"));

        match events.try_recv().unwrap() {
            DashboardEvent::PendingUpdateCreated { node_id, version } => {
                assert_eq!(node_id, "n1");
                assert_eq!(version, "1.1.0");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // A second pass with the same pending version is a no-op.
        let summary = f.job.run_once(JobTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.actions, 0);
    }

    #[tokio::test]
    async fn test_failures_disable_after_five() {
        let f = fixture(true, UpdateApproval::Automatic).await;

        for _ in 0..5 {
            f.job.run_once(JobTrigger::Scheduled).await.unwrap();
        }

        let settings = f.settings.get_node_settings("n1").await.unwrap();
        assert!(!settings.auto_update_enabled);
        assert_eq!(settings.auto_update_failures, 5);
        assert_eq!(f.ssh_calls.calls.load(Ordering::SeqCst), 5);

        // Disabled nodes no longer match.
        let summary = f.job.run_once(JobTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.matched_nodes, 0);
        assert_eq!(f.ssh_calls.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_offline_nodes_skipped() {
        let f = fixture(false, UpdateApproval::Automatic).await;
        f.nodes.set_status("n1", NodeStatus::Offline).await.unwrap();

        let summary = f.job.run_once(JobTrigger::Scheduled).await.unwrap();
        assert_eq!(summary.matched_nodes, 0);
    }
}
