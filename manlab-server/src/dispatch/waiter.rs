//! Request/response correlation over the command queue.
//!
//! HTTP handlers enqueue a command, then poll the store until the command
//! reaches a terminal state or a deadline passes. The store is the single
//! source of truth; no push notification is required for correctness.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::database::models::{CommandQueueItemDbModel, CommandQueueStatus};
use crate::database::repositories::CommandQueueRepository;
use crate::{Error, Result};

/// Waiter tuning.
#[derive(Debug, Clone)]
pub struct WaiterConfig {
    /// Store poll interval. Short enough for interactive UX, long enough to
    /// keep DB load bounded under hundreds of concurrent operations.
    pub poll_interval: Duration,
    /// Deadline for file operations.
    pub file_op_timeout: Duration,
    /// Deadline for generic commands.
    pub generic_timeout: Duration,
}

impl Default for WaiterConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(150),
            file_op_timeout: Duration::from_secs(10),
            generic_timeout: Duration::from_secs(30),
        }
    }
}

impl WaiterConfig {
    /// Deadline for `log.tail`: the requested duration plus slack for the
    /// agent round trip.
    pub fn log_tail_timeout(&self, duration_seconds: u64) -> Duration {
        Duration::from_secs(duration_seconds) + self.file_op_timeout
    }
}

/// Awaits terminal command states.
pub struct CompletionWaiter {
    commands: Arc<dyn CommandQueueRepository>,
    config: WaiterConfig,
}

impl CompletionWaiter {
    pub fn new(commands: Arc<dyn CommandQueueRepository>) -> Self {
        Self::with_config(commands, WaiterConfig::default())
    }

    pub fn with_config(commands: Arc<dyn CommandQueueRepository>, config: WaiterConfig) -> Self {
        Self { commands, config }
    }

    pub fn config(&self) -> &WaiterConfig {
        &self.config
    }

    /// Poll until the command reaches a terminal state.
    ///
    /// Returns `AgentTimeout` at the deadline and `AgentFailed` with the
    /// output tail when the agent reports failure. On success the item is
    /// returned with its tail-bounded output.
    pub async fn wait(
        &self,
        command_id: &str,
        timeout: Duration,
    ) -> Result<CommandQueueItemDbModel> {
        let deadline = Instant::now() + timeout;

        loop {
            let item = self.commands.get(command_id).await?;
            match item.status() {
                Some(CommandQueueStatus::Success) => return Ok(item),
                Some(CommandQueueStatus::Failed) => {
                    return Err(Error::AgentFailed {
                        output: item.output_log.unwrap_or_default(),
                    });
                }
                _ => {}
            }

            if Instant::now() >= deadline {
                debug!(command_id, "Deadline reached waiting for agent response");
                return Err(Error::AgentTimeout);
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Wait with the file-operation deadline.
    pub async fn wait_file_op(&self, command_id: &str) -> Result<CommandQueueItemDbModel> {
        self.wait(command_id, self.config.file_op_timeout).await
    }

    /// Wait with the generic deadline.
    pub async fn wait_generic(&self, command_id: &str) -> Result<CommandQueueItemDbModel> {
        self.wait(command_id, self.config.generic_timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_proto::{CommandStatus, CommandType};
    use crate::database::init_memory_pool;
    use crate::database::models::{NodeDbModel, NodeStatus};
    use crate::database::repositories::{
        NodeRepository, SqlxCommandQueueRepository, SqlxNodeRepository,
    };

    async fn setup() -> (Arc<dyn CommandQueueRepository>, CompletionWaiter) {
        let pool = init_memory_pool().await.unwrap();
        SqlxNodeRepository::new(pool.clone())
            .create(&NodeDbModel {
                id: "n1".to_string(),
                hostname: "n1".to_string(),
                os: String::new(),
                status: NodeStatus::Online.as_str().to_string(),
                last_seen: None,
                agent_version: String::new(),
                auth_key_hash: "h".to_string(),
                ip_address: None,
                created_at: chrono::Utc::now().to_rfc3339(),
            })
            .await
            .unwrap();

        let commands: Arc<dyn CommandQueueRepository> =
            Arc::new(SqlxCommandQueueRepository::new(pool));
        let waiter = CompletionWaiter::with_config(
            Arc::clone(&commands),
            WaiterConfig {
                poll_interval: Duration::from_millis(10),
                file_op_timeout: Duration::from_millis(200),
                generic_timeout: Duration::from_millis(400),
            },
        );
        (commands, waiter)
    }

    #[tokio::test]
    async fn test_wait_returns_success_output() {
        let (commands, waiter) = setup().await;
        let id = commands
            .enqueue("n1", CommandType::FileList, &serde_json::json!({}))
            .await
            .unwrap();

        let completer = Arc::clone(&commands);
        let completer_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            completer
                .complete(&completer_id, CommandStatus::Success, "[]")
                .await
                .unwrap();
        });

        let item = waiter.wait_file_op(&id).await.unwrap();
        assert_eq!(item.output_log.as_deref(), Some("[]"));
    }

    #[tokio::test]
    async fn test_wait_surfaces_failure_tail() {
        let (commands, waiter) = setup().await;
        let id = commands
            .enqueue("n1", CommandType::ScriptRun, &serde_json::json!({}))
            .await
            .unwrap();
        commands
            .complete(&id, CommandStatus::Failed, "permission denied")
            .await
            .unwrap();

        match waiter.wait_generic(&id).await {
            Err(Error::AgentFailed { output }) => assert_eq!(output, "permission denied"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (commands, waiter) = setup().await;
        let id = commands
            .enqueue("n1", CommandType::FileList, &serde_json::json!({}))
            .await
            .unwrap();

        match waiter.wait_file_op(&id).await {
            Err(Error::AgentTimeout) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_log_tail_deadline_adds_slack() {
        let config = WaiterConfig::default();
        assert_eq!(
            config.log_tail_timeout(30),
            Duration::from_secs(40)
        );
    }
}
