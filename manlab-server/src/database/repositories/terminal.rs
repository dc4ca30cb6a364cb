//! Terminal session repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::TerminalSessionDbModel;

/// Terminal session repository trait.
#[async_trait]
pub trait TerminalSessionRepository: Send + Sync {
    async fn insert(&self, session: &TerminalSessionDbModel) -> Result<()>;
    async fn set_status(&self, id: &str, status: &str) -> Result<()>;
    async fn list_for_node(&self, node_id: &str) -> Result<Vec<TerminalSessionDbModel>>;
}

/// SQLx implementation of TerminalSessionRepository.
pub struct SqlxTerminalSessionRepository {
    pool: SqlitePool,
}

impl SqlxTerminalSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TerminalSessionRepository for SqlxTerminalSessionRepository {
    async fn insert(&self, session: &TerminalSessionDbModel) -> Result<()> {
        sqlx::query(
            "INSERT INTO terminal_sessions (id, node_id, status, requested_by, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.node_id)
        .bind(&session.status)
        .bind(&session.requested_by)
        .bind(&session.created_at)
        .bind(&session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, id: &str, status: &str) -> Result<()> {
        sqlx::query("UPDATE terminal_sessions SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_for_node(&self, node_id: &str) -> Result<Vec<TerminalSessionDbModel>> {
        let sessions = sqlx::query_as::<_, TerminalSessionDbModel>(
            "SELECT * FROM terminal_sessions WHERE node_id = ? ORDER BY created_at DESC",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }
}
