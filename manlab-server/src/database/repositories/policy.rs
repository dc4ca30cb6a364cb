//! Remote-tool policy repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::models::{FileBrowserPolicyDbModel, LogViewerPolicyDbModel};
use crate::{Error, Result};

/// Policy repository trait covering both remote-tool policy kinds.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    async fn get_log_viewer_policy(&self, id: &str) -> Result<LogViewerPolicyDbModel>;
    async fn list_log_viewer_policies(&self, node_id: &str)
    -> Result<Vec<LogViewerPolicyDbModel>>;
    async fn create_log_viewer_policy(
        &self,
        node_id: &str,
        name: &str,
        path: &str,
        max_bytes: i64,
    ) -> Result<LogViewerPolicyDbModel>;

    async fn get_file_browser_policy(&self, id: &str) -> Result<FileBrowserPolicyDbModel>;
    async fn list_file_browser_policies(
        &self,
        node_id: &str,
    ) -> Result<Vec<FileBrowserPolicyDbModel>>;
    async fn create_file_browser_policy(
        &self,
        node_id: &str,
        name: &str,
        root_path: &str,
        max_bytes: i64,
    ) -> Result<FileBrowserPolicyDbModel>;
}

/// SQLx implementation of PolicyRepository.
pub struct SqlxPolicyRepository {
    pool: SqlitePool,
}

impl SqlxPolicyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PolicyRepository for SqlxPolicyRepository {
    async fn get_log_viewer_policy(&self, id: &str) -> Result<LogViewerPolicyDbModel> {
        sqlx::query_as::<_, LogViewerPolicyDbModel>(
            "SELECT * FROM log_viewer_policies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("LogViewerPolicy", id))
    }

    async fn list_log_viewer_policies(
        &self,
        node_id: &str,
    ) -> Result<Vec<LogViewerPolicyDbModel>> {
        let policies = sqlx::query_as::<_, LogViewerPolicyDbModel>(
            "SELECT * FROM log_viewer_policies WHERE node_id = ? ORDER BY name",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(policies)
    }

    async fn create_log_viewer_policy(
        &self,
        node_id: &str,
        name: &str,
        path: &str,
        max_bytes: i64,
    ) -> Result<LogViewerPolicyDbModel> {
        let policy = LogViewerPolicyDbModel {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            name: name.to_string(),
            path: path.to_string(),
            max_bytes,
            created_at: Utc::now().to_rfc3339(),
        };
        sqlx::query(
            "INSERT INTO log_viewer_policies (id, node_id, name, path, max_bytes, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&policy.id)
        .bind(&policy.node_id)
        .bind(&policy.name)
        .bind(&policy.path)
        .bind(policy.max_bytes)
        .bind(&policy.created_at)
        .execute(&self.pool)
        .await?;
        Ok(policy)
    }

    async fn get_file_browser_policy(&self, id: &str) -> Result<FileBrowserPolicyDbModel> {
        sqlx::query_as::<_, FileBrowserPolicyDbModel>(
            "SELECT * FROM file_browser_policies WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::not_found("FileBrowserPolicy", id))
    }

    async fn list_file_browser_policies(
        &self,
        node_id: &str,
    ) -> Result<Vec<FileBrowserPolicyDbModel>> {
        let policies = sqlx::query_as::<_, FileBrowserPolicyDbModel>(
            "SELECT * FROM file_browser_policies WHERE node_id = ? ORDER BY name",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(policies)
    }

    async fn create_file_browser_policy(
        &self,
        node_id: &str,
        name: &str,
        root_path: &str,
        max_bytes: i64,
    ) -> Result<FileBrowserPolicyDbModel> {
        let policy = FileBrowserPolicyDbModel {
            id: Uuid::new_v4().to_string(),
            node_id: node_id.to_string(),
            name: name.to_string(),
            root_path: root_path.to_string(),
            max_bytes,
            created_at: Utc::now().to_rfc3339(),
        };
        sqlx::query(
            "INSERT INTO file_browser_policies (id, node_id, name, root_path, max_bytes, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&policy.id)
        .bind(&policy.node_id)
        .bind(&policy.name)
        .bind(&policy.root_path)
        .bind(policy.max_bytes)
        .bind(&policy.created_at)
        .execute(&self.pool)
        .await?;
        Ok(policy)
    }
}
