//! Node repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::database::models::{NodeDbModel, NodeStatus};
use crate::{Error, Result};

/// Node repository trait.
#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn get(&self, id: &str) -> Result<NodeDbModel>;
    async fn get_by_auth_hash(&self, auth_key_hash: &str) -> Result<Option<NodeDbModel>>;
    async fn list(&self) -> Result<Vec<NodeDbModel>>;
    async fn list_by_status(&self, status: NodeStatus) -> Result<Vec<NodeDbModel>>;
    /// Online nodes whose last heartbeat predates `cutoff` (or was never set).
    async fn list_online_silent_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<NodeDbModel>>;
    async fn create(&self, node: &NodeDbModel) -> Result<()>;
    /// Set a node's status; returns false when the row does not exist.
    async fn set_status(&self, id: &str, status: NodeStatus) -> Result<bool>;
    /// Record a heartbeat: bump last_seen, flip to Online unless the node is
    /// pinned in Maintenance.
    async fn record_heartbeat(&self, id: &str, seen_at: DateTime<Utc>) -> Result<()>;
    /// Refresh identity fields reported at connect time.
    async fn update_identity(
        &self,
        id: &str,
        hostname: &str,
        os: &str,
        agent_version: &str,
        ip_address: Option<&str>,
    ) -> Result<()>;
    async fn delete(&self, id: &str) -> Result<bool>;
}

/// SQLx implementation of NodeRepository.
pub struct SqlxNodeRepository {
    pool: SqlitePool,
}

impl SqlxNodeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeRepository for SqlxNodeRepository {
    async fn get(&self, id: &str) -> Result<NodeDbModel> {
        sqlx::query_as::<_, NodeDbModel>("SELECT * FROM nodes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Node", id))
    }

    async fn get_by_auth_hash(&self, auth_key_hash: &str) -> Result<Option<NodeDbModel>> {
        let node = sqlx::query_as::<_, NodeDbModel>("SELECT * FROM nodes WHERE auth_key_hash = ?")
            .bind(auth_key_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(node)
    }

    async fn list(&self) -> Result<Vec<NodeDbModel>> {
        let nodes = sqlx::query_as::<_, NodeDbModel>("SELECT * FROM nodes ORDER BY hostname")
            .fetch_all(&self.pool)
            .await?;
        Ok(nodes)
    }

    async fn list_by_status(&self, status: NodeStatus) -> Result<Vec<NodeDbModel>> {
        let nodes = sqlx::query_as::<_, NodeDbModel>(
            "SELECT * FROM nodes WHERE status = ? ORDER BY hostname",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(nodes)
    }

    async fn list_online_silent_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<NodeDbModel>> {
        let nodes = sqlx::query_as::<_, NodeDbModel>(
            "SELECT * FROM nodes WHERE status = 'ONLINE' AND (last_seen IS NULL OR last_seen < ?)",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(nodes)
    }

    async fn create(&self, node: &NodeDbModel) -> Result<()> {
        sqlx::query(
            "INSERT INTO nodes (id, hostname, os, status, last_seen, agent_version, auth_key_hash, ip_address, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&node.id)
        .bind(&node.hostname)
        .bind(&node.os)
        .bind(&node.status)
        .bind(&node.last_seen)
        .bind(&node.agent_version)
        .bind(&node.auth_key_hash)
        .bind(&node.ip_address)
        .bind(&node.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, id: &str, status: NodeStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE nodes SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_heartbeat(&self, id: &str, seen_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE nodes SET last_seen = ?, \
             status = CASE WHEN status = 'MAINTENANCE' THEN status ELSE 'ONLINE' END \
             WHERE id = ?",
        )
        .bind(seen_at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_identity(
        &self,
        id: &str,
        hostname: &str,
        os: &str,
        agent_version: &str,
        ip_address: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE nodes SET hostname = ?, os = ?, agent_version = ?, ip_address = COALESCE(?, ip_address) \
             WHERE id = ?",
        )
        .bind(hostname)
        .bind(os)
        .bind(agent_version)
        .bind(ip_address)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM nodes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;

    fn sample_node(id: &str) -> NodeDbModel {
        NodeDbModel {
            id: id.to_string(),
            hostname: format!("host-{id}"),
            os: "Ubuntu 24.04".to_string(),
            status: NodeStatus::Offline.as_str().to_string(),
            last_seen: None,
            agent_version: "1.0.0".to_string(),
            auth_key_hash: format!("hash-{id}"),
            ip_address: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let pool = init_memory_pool().await.unwrap();
        let repo = SqlxNodeRepository::new(pool);

        repo.create(&sample_node("n1")).await.unwrap();
        let node = repo.get("n1").await.unwrap();
        assert_eq!(node.hostname, "host-n1");
        assert_eq!(node.status(), Some(NodeStatus::Offline));

        assert!(matches!(
            repo.get("missing").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_heartbeat_flips_online_but_not_maintenance() {
        let pool = init_memory_pool().await.unwrap();
        let repo = SqlxNodeRepository::new(pool);

        repo.create(&sample_node("n1")).await.unwrap();
        repo.record_heartbeat("n1", Utc::now()).await.unwrap();
        assert_eq!(repo.get("n1").await.unwrap().status(), Some(NodeStatus::Online));

        repo.set_status("n1", NodeStatus::Maintenance).await.unwrap();
        repo.record_heartbeat("n1", Utc::now()).await.unwrap();
        assert_eq!(
            repo.get("n1").await.unwrap().status(),
            Some(NodeStatus::Maintenance)
        );
    }

    #[tokio::test]
    async fn test_silent_nodes_query() {
        let pool = init_memory_pool().await.unwrap();
        let repo = SqlxNodeRepository::new(pool);

        repo.create(&sample_node("stale")).await.unwrap();
        repo.create(&sample_node("fresh")).await.unwrap();

        let old = Utc::now() - chrono::Duration::seconds(300);
        repo.record_heartbeat("stale", old).await.unwrap();
        repo.record_heartbeat("fresh", Utc::now()).await.unwrap();

        let cutoff = Utc::now() - chrono::Duration::seconds(120);
        let silent = repo.list_online_silent_since(cutoff).await.unwrap();
        assert_eq!(silent.len(), 1);
        assert_eq!(silent[0].id, "stale");
    }
}
