//! Node settings and system settings repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::database::models::{NodeSettingsDbModel, SystemSettingDbModel};
use crate::Result;

/// Settings repository trait.
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Settings for a node; defaults when no row exists yet.
    async fn get_node_settings(&self, node_id: &str) -> Result<NodeSettingsDbModel>;
    async fn upsert_node_settings(&self, settings: &NodeSettingsDbModel) -> Result<()>;
    /// Bump the consecutive-failure counter; returns the new count.
    async fn record_auto_update_failure(&self, node_id: &str) -> Result<i64>;
    async fn reset_auto_update_failures(&self, node_id: &str) -> Result<()>;
    async fn disable_auto_update(&self, node_id: &str) -> Result<()>;
    async fn set_pending_agent_version(&self, node_id: &str, version: Option<&str>) -> Result<()>;

    async fn get_system_setting(&self, key: &str) -> Result<Option<SystemSettingDbModel>>;
    async fn set_system_setting(&self, key: &str, value: &str, is_secret: bool) -> Result<()>;
}

/// SQLx implementation of SettingsRepository.
pub struct SqlxSettingsRepository {
    pool: SqlitePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get_node_settings(&self, node_id: &str) -> Result<NodeSettingsDbModel> {
        let settings = sqlx::query_as::<_, NodeSettingsDbModel>(
            "SELECT * FROM node_settings WHERE node_id = ?",
        )
        .bind(node_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(settings.unwrap_or_else(|| NodeSettingsDbModel::defaults(node_id)))
    }

    async fn upsert_node_settings(&self, settings: &NodeSettingsDbModel) -> Result<()> {
        sqlx::query(
            "INSERT INTO node_settings (node_id, remote_tools_enabled, auto_update_enabled, \
             auto_update_approval, auto_update_failures, pending_agent_version, \
             maintenance_window_start, maintenance_window_end, system_update_enabled, \
             system_update_categories, auto_approve_updates) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (node_id) DO UPDATE SET \
             remote_tools_enabled = excluded.remote_tools_enabled, \
             auto_update_enabled = excluded.auto_update_enabled, \
             auto_update_approval = excluded.auto_update_approval, \
             auto_update_failures = excluded.auto_update_failures, \
             pending_agent_version = excluded.pending_agent_version, \
             maintenance_window_start = excluded.maintenance_window_start, \
             maintenance_window_end = excluded.maintenance_window_end, \
             system_update_enabled = excluded.system_update_enabled, \
             system_update_categories = excluded.system_update_categories, \
             auto_approve_updates = excluded.auto_approve_updates",
        )
        .bind(&settings.node_id)
        .bind(settings.remote_tools_enabled)
        .bind(settings.auto_update_enabled)
        .bind(&settings.auto_update_approval)
        .bind(settings.auto_update_failures)
        .bind(&settings.pending_agent_version)
        .bind(&settings.maintenance_window_start)
        .bind(&settings.maintenance_window_end)
        .bind(settings.system_update_enabled)
        .bind(&settings.system_update_categories)
        .bind(settings.auto_approve_updates)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_auto_update_failure(&self, node_id: &str) -> Result<i64> {
        let mut settings = self.get_node_settings(node_id).await?;
        settings.auto_update_failures += 1;
        self.upsert_node_settings(&settings).await?;
        Ok(settings.auto_update_failures)
    }

    async fn reset_auto_update_failures(&self, node_id: &str) -> Result<()> {
        let mut settings = self.get_node_settings(node_id).await?;
        settings.auto_update_failures = 0;
        self.upsert_node_settings(&settings).await
    }

    async fn disable_auto_update(&self, node_id: &str) -> Result<()> {
        let mut settings = self.get_node_settings(node_id).await?;
        settings.auto_update_enabled = false;
        self.upsert_node_settings(&settings).await
    }

    async fn set_pending_agent_version(&self, node_id: &str, version: Option<&str>) -> Result<()> {
        let mut settings = self.get_node_settings(node_id).await?;
        settings.pending_agent_version = version.map(str::to_string);
        self.upsert_node_settings(&settings).await
    }

    async fn get_system_setting(&self, key: &str) -> Result<Option<SystemSettingDbModel>> {
        let setting = sqlx::query_as::<_, SystemSettingDbModel>(
            "SELECT * FROM system_settings WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(setting)
    }

    async fn set_system_setting(&self, key: &str, value: &str, is_secret: bool) -> Result<()> {
        sqlx::query(
            "INSERT INTO system_settings (key, value, is_secret, updated_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, \
             is_secret = excluded.is_secret, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(is_secret)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
