//! Cron-driven control loops.
//!
//! Two periodic jobs share the command-queue contract: agent auto-update
//! and OS system-update checks. Jobs never run concurrently with
//! themselves; a manual trigger while a run is in flight is refused.

pub mod agent_update;
pub mod catalog;
pub mod ssh;
pub mod system_update;

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{Error, Result};

pub use agent_update::AgentUpdateJob;
pub use catalog::{ReleaseCatalog, ReleaseCatalogConfig, compare_versions};
pub use ssh::{PackageUpdate, SshCollaborator, UnconfiguredSsh};
pub use system_update::SystemUpdateJob;

/// Default schedule for the agent auto-update job (every 15 minutes).
pub const AGENT_UPDATE_SCHEDULE: &str = "0 */15 * * * *";

/// Default schedule for the OS system-update job (every 6 hours).
pub const SYSTEM_UPDATE_SCHEDULE: &str = "0 0 */6 * * *";

/// What started a job run.
#[derive(Debug, Clone)]
pub enum JobTrigger {
    Scheduled,
    Manual { actor: String },
}

impl JobTrigger {
    pub fn actor(&self) -> &str {
        match self {
            Self::Scheduled => "scheduler",
            Self::Manual { actor } => actor,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }
}

/// Result of one job pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    /// Nodes that matched the job's eligibility filter.
    pub matched_nodes: usize,
    /// Actions taken (updates triggered, histories created).
    pub actions: usize,
}

/// A periodic control-loop job.
#[async_trait]
pub trait ScheduledJob: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run_once(&self, trigger: JobTrigger) -> Result<JobSummary>;
}

/// Wraps a job with a disallow-concurrent-execution guard.
pub struct JobHandle {
    job: Arc<dyn ScheduledJob>,
    running: AtomicBool,
}

impl JobHandle {
    pub fn new(job: Arc<dyn ScheduledJob>) -> Arc<Self> {
        Arc::new(Self {
            job,
            running: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &'static str {
        self.job.name()
    }

    /// Run the job unless a run is already in flight.
    pub async fn trigger(&self, trigger: JobTrigger) -> Result<JobSummary> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::conflict(format!(
                "job {} is already running",
                self.job.name()
            )));
        }

        let result = self.job.run_once(trigger).await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// Spawn the cron loop for this job.
    pub fn start_cron(self: &Arc<Self>, expression: &str, cancel_token: CancellationToken) -> Result<()> {
        let schedule = cron::Schedule::from_str(expression)
            .map_err(|e| Error::Scheduler(format!("invalid cron expression: {}", e)))?;
        let handle = Arc::clone(self);
        let expression = expression.to_string();

        tokio::spawn(async move {
            info!(job = handle.name(), schedule = %expression, "Scheduler loop started");
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    warn!(job = handle.name(), "Schedule has no upcoming fire time");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();

                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!(job = handle.name(), "Scheduler loop shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(wait) => {
                        match handle.trigger(JobTrigger::Scheduled).await {
                            Ok(summary) => debug!(
                                job = handle.name(),
                                matched = summary.matched_nodes,
                                actions = summary.actions,
                                "Job pass complete"
                            ),
                            Err(Error::Conflict(_)) => {
                                debug!(job = handle.name(), "Previous run still in flight; skipping");
                            }
                            Err(e) => warn!(job = handle.name(), error = %e, "Job pass failed"),
                        }
                    }
                }
            }
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SlowJob {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledJob for SlowJob {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn run_once(&self, _trigger: JobTrigger) -> Result<JobSummary> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(JobSummary::default())
        }
    }

    #[tokio::test]
    async fn test_concurrent_trigger_refused() {
        let handle = JobHandle::new(Arc::new(SlowJob {
            runs: AtomicUsize::new(0),
        }));

        let first = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.trigger(JobTrigger::Scheduled).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = handle
            .trigger(JobTrigger::Manual {
                actor: "admin".to_string(),
            })
            .await;
        assert!(matches!(second, Err(Error::Conflict(_))));

        assert!(first.await.unwrap().is_ok());
        // After the first run finished, triggering works again.
        assert!(handle.trigger(JobTrigger::Scheduled).await.is_ok());
    }

    #[test]
    fn test_default_schedules_parse() {
        assert!(cron::Schedule::from_str(AGENT_UPDATE_SCHEDULE).is_ok());
        assert!(cron::Schedule::from_str(SYSTEM_UPDATE_SCHEDULE).is_ok());
    }
}
