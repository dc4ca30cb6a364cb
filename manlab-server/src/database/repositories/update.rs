//! System update history repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::models::{
    SystemUpdateHistoryDbModel, SystemUpdateLogDbModel, SystemUpdateStatus,
};
use crate::{Error, Result};

/// System update repository trait.
#[async_trait]
pub trait SystemUpdateRepository: Send + Sync {
    async fn create_history(&self, history: &SystemUpdateHistoryDbModel) -> Result<()>;
    async fn get_history(&self, id: &str) -> Result<SystemUpdateHistoryDbModel>;
    async fn list_histories(&self, limit: u32) -> Result<Vec<SystemUpdateHistoryDbModel>>;
    async fn list_histories_for_node(
        &self,
        node_id: &str,
    ) -> Result<Vec<SystemUpdateHistoryDbModel>>;
    /// Workflow-guarded transition; errors on an illegal move.
    async fn set_history_status(
        &self,
        id: &str,
        status: SystemUpdateStatus,
        actor: &str,
        error: Option<&str>,
    ) -> Result<()>;
    /// Latest non-terminal history for a node, if any.
    async fn get_open_history_for_node(
        &self,
        node_id: &str,
    ) -> Result<Option<SystemUpdateHistoryDbModel>>;
    async fn append_log(&self, history_id: &str, message: &str) -> Result<()>;
    async fn list_logs(&self, history_id: &str) -> Result<Vec<SystemUpdateLogDbModel>>;
}

/// SQLx implementation of SystemUpdateRepository.
pub struct SqlxSystemUpdateRepository {
    pool: SqlitePool,
}

impl SqlxSystemUpdateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SystemUpdateRepository for SqlxSystemUpdateRepository {
    async fn create_history(&self, history: &SystemUpdateHistoryDbModel) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_update_histories (id, node_id, status, packages, reboot_required, actor, created_at, completed_at, error) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&history.id)
        .bind(&history.node_id)
        .bind(&history.status)
        .bind(&history.packages)
        .bind(history.reboot_required)
        .bind(&history.actor)
        .bind(&history.created_at)
        .bind(&history.completed_at)
        .bind(&history.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_history(&self, id: &str) -> Result<SystemUpdateHistoryDbModel> {
        sqlx::query_as::<_, SystemUpdateHistoryDbModel>(
            "SELECT * FROM system_update_histories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("SystemUpdateHistory", id))
    }

    async fn list_histories(&self, limit: u32) -> Result<Vec<SystemUpdateHistoryDbModel>> {
        let histories = sqlx::query_as::<_, SystemUpdateHistoryDbModel>(
            "SELECT * FROM system_update_histories ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(histories)
    }

    async fn list_histories_for_node(
        &self,
        node_id: &str,
    ) -> Result<Vec<SystemUpdateHistoryDbModel>> {
        let histories = sqlx::query_as::<_, SystemUpdateHistoryDbModel>(
            "SELECT * FROM system_update_histories WHERE node_id = ? ORDER BY created_at DESC",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(histories)
    }

    async fn set_history_status(
        &self,
        id: &str,
        status: SystemUpdateStatus,
        actor: &str,
        error: Option<&str>,
    ) -> Result<()> {
        let history = self.get_history(id).await?;
        let current = history
            .status()
            .ok_or_else(|| Error::Database(format!("corrupt status on history {}", id)))?;

        if !current.can_transition_to(status) {
            return Err(Error::InvalidStateTransition {
                from: current.as_str().to_string(),
                to: status.as_str().to_string(),
            });
        }

        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
        sqlx::query(
            "UPDATE system_update_histories SET status = ?, actor = ?, error = ?, \
             completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(actor)
        .bind(error)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_open_history_for_node(
        &self,
        node_id: &str,
    ) -> Result<Option<SystemUpdateHistoryDbModel>> {
        let history = sqlx::query_as::<_, SystemUpdateHistoryDbModel>(
            "SELECT * FROM system_update_histories WHERE node_id = ? \
             AND status IN ('PENDING', 'APPROVED', 'IN_PROGRESS') \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(history)
    }

    async fn append_log(&self, history_id: &str, message: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_update_logs (id, history_id, message, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(history_id)
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_logs(&self, history_id: &str) -> Result<Vec<SystemUpdateLogDbModel>> {
        let logs = sqlx::query_as::<_, SystemUpdateLogDbModel>(
            "SELECT * FROM system_update_logs WHERE history_id = ? ORDER BY created_at, id",
        )
        .bind(history_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;
    use crate::database::models::{NodeDbModel, NodeStatus};
    use crate::database::repositories::node::{NodeRepository, SqlxNodeRepository};

    async fn setup() -> SqlxSystemUpdateRepository {
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
                created_at: Utc::now().to_rfc3339(),
            })
            .await
            .unwrap();
        SqlxSystemUpdateRepository::new(pool)
    }

    fn pending_history(id: &str) -> SystemUpdateHistoryDbModel {
        SystemUpdateHistoryDbModel {
            id: id.to_string(),
            node_id: "n1".to_string(),
            status: SystemUpdateStatus::Pending.as_str().to_string(),
            packages: "[\"openssl\"]".to_string(),
            reboot_required: false,
            actor: "scheduler".to_string(),
            created_at: Utc::now().to_rfc3339(),
            completed_at: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_approval_workflow_enforced() {
        let repo = setup().await;
        repo.create_history(&pending_history("h1")).await.unwrap();

        // Pending → Completed is illegal
        let err = repo
            .set_history_status("h1", SystemUpdateStatus::Completed, "admin", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));

        repo.set_history_status("h1", SystemUpdateStatus::Approved, "admin", None)
            .await
            .unwrap();
        repo.set_history_status("h1", SystemUpdateStatus::InProgress, "scheduler", None)
            .await
            .unwrap();
        repo.set_history_status("h1", SystemUpdateStatus::Completed, "scheduler", None)
            .await
            .unwrap();

        let history = repo.get_history("h1").await.unwrap();
        assert_eq!(history.status(), Some(SystemUpdateStatus::Completed));
        assert!(history.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_open_history_lookup() {
        let repo = setup().await;
        repo.create_history(&pending_history("h1")).await.unwrap();

        let open = repo.get_open_history_for_node("n1").await.unwrap();
        assert_eq!(open.unwrap().id, "h1");

        repo.set_history_status("h1", SystemUpdateStatus::Cancelled, "admin", None)
            .await
            .unwrap();
        assert!(repo.get_open_history_for_node("n1").await.unwrap().is_none());
    }
}
