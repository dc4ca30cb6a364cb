//! Script and script-run repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::models::{ScriptDbModel, ScriptRunDbModel, ScriptRunStatus};
use crate::{Error, Result};

/// Script repository trait.
#[async_trait]
pub trait ScriptRepository: Send + Sync {
    async fn get_script(&self, id: &str) -> Result<ScriptDbModel>;
    async fn list_scripts(&self) -> Result<Vec<ScriptDbModel>>;
    async fn create_script(
        &self,
        name: &str,
        content: &str,
        timeout_seconds: i64,
    ) -> Result<ScriptDbModel>;

    async fn get_run(&self, id: &str) -> Result<ScriptRunDbModel>;
    async fn get_run_by_command(&self, command_id: &str) -> Result<Option<ScriptRunDbModel>>;
    async fn create_run(&self, run: &ScriptRunDbModel) -> Result<()>;
    /// Guarded status move; false when the run was already terminal.
    async fn set_run_status(
        &self,
        id: &str,
        status: ScriptRunStatus,
        output_log: Option<&str>,
    ) -> Result<bool>;
}

/// SQLx implementation of ScriptRepository.
pub struct SqlxScriptRepository {
    pool: SqlitePool,
}

impl SqlxScriptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScriptRepository for SqlxScriptRepository {
    async fn get_script(&self, id: &str) -> Result<ScriptDbModel> {
        sqlx::query_as::<_, ScriptDbModel>("SELECT * FROM scripts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("Script", id))
    }

    async fn list_scripts(&self) -> Result<Vec<ScriptDbModel>> {
        let scripts = sqlx::query_as::<_, ScriptDbModel>("SELECT * FROM scripts ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(scripts)
    }

    async fn create_script(
        &self,
        name: &str,
        content: &str,
        timeout_seconds: i64,
    ) -> Result<ScriptDbModel> {
        let now = Utc::now().to_rfc3339();
        let script = ScriptDbModel {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            content: content.to_string(),
            timeout_seconds,
            created_at: now.clone(),
            updated_at: now,
        };
        sqlx::query(
            "INSERT INTO scripts (id, name, content, timeout_seconds, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&script.id)
        .bind(&script.name)
        .bind(&script.content)
        .bind(script.timeout_seconds)
        .bind(&script.created_at)
        .bind(&script.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(script)
    }

    async fn get_run(&self, id: &str) -> Result<ScriptRunDbModel> {
        sqlx::query_as::<_, ScriptRunDbModel>("SELECT * FROM script_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found("ScriptRun", id))
    }

    async fn get_run_by_command(&self, command_id: &str) -> Result<Option<ScriptRunDbModel>> {
        let run =
            sqlx::query_as::<_, ScriptRunDbModel>("SELECT * FROM script_runs WHERE command_id = ?")
                .bind(command_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(run)
    }

    async fn create_run(&self, run: &ScriptRunDbModel) -> Result<()> {
        sqlx::query(
            "INSERT INTO script_runs (id, script_id, node_id, command_id, status, output_log, requested_by, created_at, completed_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.id)
        .bind(&run.script_id)
        .bind(&run.node_id)
        .bind(&run.command_id)
        .bind(&run.status)
        .bind(&run.output_log)
        .bind(&run.requested_by)
        .bind(&run.created_at)
        .bind(&run.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_run_status(
        &self,
        id: &str,
        status: ScriptRunStatus,
        output_log: Option<&str>,
    ) -> Result<bool> {
        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
        let result = sqlx::query(
            "UPDATE script_runs SET status = ?, output_log = COALESCE(?, output_log), \
             completed_at = COALESCE(?, completed_at) \
             WHERE id = ? AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(status.as_str())
        .bind(output_log)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
