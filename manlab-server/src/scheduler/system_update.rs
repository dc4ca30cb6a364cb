//! OS system-update job.
//!
//! For every Online node with system updates enabled and inside its
//! maintenance window, list available packages over SSH, filter by the
//! node's selected categories, and open a `SystemUpdateHistory` — Pending
//! for the approval workflow, or Approved (and executed asynchronously)
//! when the node auto-approves.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{JobSummary, JobTrigger, ScheduledJob};
use crate::Result;
use crate::audit::AuditQueue;
use crate::database::models::{
    NodeDbModel, NodeStatus, SystemUpdateHistoryDbModel, SystemUpdateStatus,
};
use crate::database::repositories::{NodeRepository, SettingsRepository, SystemUpdateRepository};
use crate::notification::{
    DashboardEvent, EventBroadcaster, NotificationEvent, NotificationService,
};
use crate::scheduler::ssh::SshCollaborator;

/// The OS system-update control loop.
pub struct SystemUpdateJob {
    nodes: Arc<dyn NodeRepository>,
    settings: Arc<dyn SettingsRepository>,
    updates: Arc<dyn SystemUpdateRepository>,
    ssh: Arc<dyn SshCollaborator>,
    broadcaster: EventBroadcaster,
    notifications: Arc<NotificationService>,
    audit: AuditQueue,
}

impl SystemUpdateJob {
    pub fn new(
        nodes: Arc<dyn NodeRepository>,
        settings: Arc<dyn SettingsRepository>,
        updates: Arc<dyn SystemUpdateRepository>,
        ssh: Arc<dyn SshCollaborator>,
        broadcaster: EventBroadcaster,
        notifications: Arc<NotificationService>,
        audit: AuditQueue,
    ) -> Self {
        Self {
            nodes,
            settings,
            updates,
            ssh,
            broadcaster,
            notifications,
            audit,
        }
    }

    /// Execute an approved history synchronously: apply the packages and
    /// record the terminal state. Also used by the approval route.
    pub async fn execute_history(&self, history_id: &str) -> Result<()> {
        execute_history(
            Arc::clone(&self.updates),
            Arc::clone(&self.nodes),
            Arc::clone(&self.ssh),
            history_id,
        )
        .await
    }

    /// Spawn `execute_history` without blocking the caller.
    pub fn execute_async(&self, history_id: String) {
        let updates = Arc::clone(&self.updates);
        let nodes = Arc::clone(&self.nodes);
        let ssh = Arc::clone(&self.ssh);
        tokio::spawn(async move {
            if let Err(e) = execute_history(updates, nodes, ssh, &history_id).await {
                warn!(history_id, error = %e, "Async system update execution failed");
            }
        });
    }

    async fn check_node(
        &self,
        node: &NodeDbModel,
        trigger: &JobTrigger,
        auto_approve: bool,
        categories: &[String],
    ) -> Result<bool> {
        let available = self.ssh.list_available_updates(node).await?;
        let matching: Vec<String> = available
            .iter()
            .filter(|p| categories.iter().any(|c| c.eq_ignore_ascii_case(&p.category)))
            .map(|p| p.name.clone())
            .collect();

        if matching.is_empty() {
            debug!(node_id = %node.id, "No matching OS updates");
            return Ok(false);
        }

        let status = if auto_approve {
            SystemUpdateStatus::Approved
        } else {
            SystemUpdateStatus::Pending
        };

        let history = SystemUpdateHistoryDbModel {
            id: Uuid::new_v4().to_string(),
            node_id: node.id.clone(),
            status: status.as_str().to_string(),
            packages: serde_json::to_string(&matching)?,
            reboot_required: false,
            actor: trigger.actor().to_string(),
            created_at: Utc::now().to_rfc3339(),
            completed_at: None,
            error: None,
        };
        self.updates.create_history(&history).await?;

        self.broadcaster.broadcast(DashboardEvent::SystemUpdateDetected {
            node_id: node.id.clone(),
            history_id: history.id.clone(),
            packages: matching.clone(),
        });
        self.notifications
            .notify(NotificationEvent::SystemUpdatesDetected {
                node_id: node.id.clone(),
                hostname: node.hostname.clone(),
                package_count: matching.len(),
                timestamp: Utc::now(),
            })
            .await;
        self.audit.record(
            "system.update.detected",
            "update",
            trigger.actor(),
            Some(node.id.clone()),
            true,
            format!("{} packages ({})", matching.len(), status.as_str()),
        );

        if auto_approve {
            self.execute_async(history.id);
        }

        Ok(true)
    }
}

/// Apply an approved history's packages over SSH and persist the outcome.
async fn execute_history(
    updates: Arc<dyn SystemUpdateRepository>,
    nodes: Arc<dyn NodeRepository>,
    ssh: Arc<dyn SshCollaborator>,
    history_id: &str,
) -> Result<()> {
    let history = updates.get_history(history_id).await?;
    let node = nodes.get(&history.node_id).await?;
    let packages = history.package_list();

    updates
        .set_history_status(history_id, SystemUpdateStatus::InProgress, "scheduler", None)
        .await?;
    updates
        .append_log(history_id, &format!("applying {} packages", packages.len()))
        .await?;

    match ssh.apply_updates(&node, &packages).await {
        Ok(reboot_required) => {
            updates
                .set_history_status(history_id, SystemUpdateStatus::Completed, "scheduler", None)
                .await?;
            updates
                .append_log(
                    history_id,
                    if reboot_required {
                        "completed; reboot required"
                    } else {
                        "completed"
                    },
                )
                .await?;
            info!(history_id, node_id = %node.id, "System update completed");
        }
        Err(e) => {
            updates
                .set_history_status(
                    history_id,
                    SystemUpdateStatus::Failed,
                    "scheduler",
                    Some(&e.to_string()),
                )
                .await?;
            updates
                .append_log(history_id, &format!("failed: {}", e))
                .await?;
            warn!(history_id, node_id = %node.id, error = %e, "System update failed");
        }
    }
    Ok(())
}

#[async_trait]
impl ScheduledJob for SystemUpdateJob {
    fn name(&self) -> &'static str {
        "system-update-check"
    }

    async fn run_once(&self, trigger: JobTrigger) -> Result<JobSummary> {
        let now = Utc::now();
        let mut summary = JobSummary::default();

        for node in self.nodes.list_by_status(NodeStatus::Online).await? {
            let node_settings = self.settings.get_node_settings(&node.id).await?;
            if !node_settings.system_update_enabled || !node_settings.in_maintenance_window(now) {
                continue;
            }

            // One open history per node at a time.
            if self.updates.get_open_history_for_node(&node.id).await?.is_some() {
                debug!(node_id = %node.id, "Update already in flight; skipping");
                continue;
            }
            summary.matched_nodes += 1;

            let categories = node_settings.update_categories();
            match self
                .check_node(
                    &node,
                    &trigger,
                    node_settings.auto_approve_updates,
                    &categories,
                )
                .await
            {
                Ok(true) => summary.actions += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(node_id = %node.id, error = %e, "System update check failed");
                    self.audit.record(
                        "system.update.check_failed",
                        "update",
                        trigger.actor(),
                        Some(node.id.clone()),
                        false,
                        e.to_string(),
                    );
                }
            }
        }

        if trigger.is_manual() {
            self.audit.record(
                "system.update.check",
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
