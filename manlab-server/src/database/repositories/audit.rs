//! Audit event repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::AuditEventDbModel;

/// Audit repository trait.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert(&self, event: &AuditEventDbModel) -> Result<()>;
    async fn list_recent(&self, limit: u32, offset: u32) -> Result<Vec<AuditEventDbModel>>;
}

/// SQLx implementation of AuditRepository.
pub struct SqlxAuditRepository {
    pool: SqlitePool,
}

impl SqlxAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for SqlxAuditRepository {
    async fn insert(&self, event: &AuditEventDbModel) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_events (id, kind, category, actor, node_id, success, message, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.id)
        .bind(&event.kind)
        .bind(&event.category)
        .bind(&event.actor)
        .bind(&event.node_id)
        .bind(event.success)
        .bind(&event.message)
        .bind(&event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_recent(&self, limit: u32, offset: u32) -> Result<Vec<AuditEventDbModel>> {
        let events = sqlx::query_as::<_, AuditEventDbModel>(
            "SELECT * FROM audit_events ORDER BY created_at DESC, id LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}
