//! Command queue repository.
//!
//! The sole arbiter for command state transitions. All terminal writes pass
//! through the output-tail cap, and guarded UPDATEs make late or duplicate
//! transitions no-ops instead of regressions.

use agent_proto::{CommandStatus, CommandType};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::warn;
use uuid::Uuid;

use crate::database::models::{
    CommandQueueItemDbModel, CommandQueueStatus, output_tail_cap, truncate_tail,
};
use crate::{Error, Result};

/// Upper bound for an enqueued command payload.
pub const MAX_PAYLOAD_BYTES: usize = 256 * 1024;

/// Command queue repository trait.
#[async_trait]
pub trait CommandQueueRepository: Send + Sync {
    /// Atomic insert with status=Queued. Returns the new command id.
    async fn enqueue(
        &self,
        node_id: &str,
        command_type: CommandType,
        payload: &serde_json::Value,
    ) -> Result<String>;

    /// Queued→Sent. Idempotent; false when the command was not in Queued.
    async fn mark_sent(&self, id: &str) -> Result<bool>;

    /// Terminal transition with the truncated output tail. Returns false
    /// when the command was already terminal (late results are dropped).
    async fn complete(&self, id: &str, status: CommandStatus, output_tail: &str) -> Result<bool>;

    async fn get(&self, id: &str) -> Result<CommandQueueItemDbModel>;

    /// All non-terminal commands for a node, oldest first.
    async fn list_pending(&self, node_id: &str) -> Result<Vec<CommandQueueItemDbModel>>;

    /// Queued commands across the given (connected) nodes, oldest first.
    async fn list_undispatched_for_connected(
        &self,
        node_ids: &[String],
    ) -> Result<Vec<CommandQueueItemDbModel>>;
}

/// SQLx implementation of CommandQueueRepository.
pub struct SqlxCommandQueueRepository {
    pool: SqlitePool,
}

impl SqlxCommandQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CommandQueueRepository for SqlxCommandQueueRepository {
    async fn enqueue(
        &self,
        node_id: &str,
        command_type: CommandType,
        payload: &serde_json::Value,
    ) -> Result<String> {
        let payload_json = serde_json::to_string(payload)?;
        if payload_json.len() > MAX_PAYLOAD_BYTES {
            return Err(Error::validation(format!(
                "command payload exceeds {} bytes",
                MAX_PAYLOAD_BYTES
            )));
        }

        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO command_queue (id, node_id, command_type, payload, status, created_at) \
             VALUES (?, ?, ?, ?, 'QUEUED', ?)",
        )
        .bind(&id)
        .bind(node_id)
        .bind(command_type.as_str())
        .bind(&payload_json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn mark_sent(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE command_queue SET status = 'SENT', sent_at = ? \
             WHERE id = ? AND status = 'QUEUED'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, id: &str, status: CommandStatus, output_tail: &str) -> Result<bool> {
        let item = self.get(id).await?;
        let cap = item
            .command_type()
            .map(output_tail_cap)
            .unwrap_or(crate::database::models::command::MAX_OUTPUT_TAIL);
        let tail = truncate_tail(output_tail, cap);

        let terminal = match status {
            CommandStatus::Success => CommandQueueStatus::Success,
            CommandStatus::Failed => CommandQueueStatus::Failed,
        };

        let result = sqlx::query(
            "UPDATE command_queue SET status = ?, output_log = ?, completed_at = ? \
             WHERE id = ? AND status IN ('QUEUED', 'SENT')",
        )
        .bind(terminal.as_str())
        .bind(&tail)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if !applied {
            warn!(
                command_id = %id,
                current = %item.status,
                incoming = %terminal,
                "Dropping late command result for terminal command"
            );
        }
        Ok(applied)
    }

    async fn get(&self, id: &str) -> Result<CommandQueueItemDbModel> {
        sqlx::query_as::<_, CommandQueueItemDbModel>("SELECT * FROM command_queue WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Command", id))
    }

    async fn list_pending(&self, node_id: &str) -> Result<Vec<CommandQueueItemDbModel>> {
        let items = sqlx::query_as::<_, CommandQueueItemDbModel>(
            "SELECT * FROM command_queue WHERE node_id = ? AND status IN ('QUEUED', 'SENT') \
             ORDER BY created_at, id",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn list_undispatched_for_connected(
        &self,
        node_ids: &[String],
    ) -> Result<Vec<CommandQueueItemDbModel>> {
        if node_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; node_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM command_queue WHERE status = 'QUEUED' AND node_id IN ({}) \
             ORDER BY created_at, id",
            placeholders
        );

        let mut query = sqlx::query_as::<_, CommandQueueItemDbModel>(&sql);
        for node_id in node_ids {
            query = query.bind(node_id);
        }
        let items = query.fetch_all(&self.pool).await?;
        Ok(items)
    }
}
