//! Enrollment token repository.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::Result;
use crate::database::models::OnboardingMachineDbModel;

/// Onboarding repository trait.
#[async_trait]
pub trait OnboardingRepository: Send + Sync {
    /// Register a machine for enrollment. `token_hash` is the SHA-256 hex of
    /// the one-shot token handed to the operator.
    async fn register(
        &self,
        token_hash: &str,
        hostname: Option<&str>,
    ) -> Result<OnboardingMachineDbModel>;

    /// Atomically consume an unused token. Returns the row when this call
    /// won the claim; None when the token is unknown or already used.
    async fn consume(&self, token_hash: &str) -> Result<Option<OnboardingMachineDbModel>>;
}

/// SQLx implementation of OnboardingRepository.
pub struct SqlxOnboardingRepository {
    pool: SqlitePool,
}

impl SqlxOnboardingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OnboardingRepository for SqlxOnboardingRepository {
    async fn register(
        &self,
        token_hash: &str,
        hostname: Option<&str>,
    ) -> Result<OnboardingMachineDbModel> {
        let machine = OnboardingMachineDbModel {
            id: Uuid::new_v4().to_string(),
            token_hash: token_hash.to_string(),
            hostname: hostname.map(str::to_string),
            created_at: Utc::now().to_rfc3339(),
            used_at: None,
        };
        sqlx::query(
            "INSERT INTO onboarding_machines (id, token_hash, hostname, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&machine.id)
        .bind(&machine.token_hash)
        .bind(&machine.hostname)
        .bind(&machine.created_at)
        .execute(&self.pool)
        .await?;
        Ok(machine)
    }

    async fn consume(&self, token_hash: &str) -> Result<Option<OnboardingMachineDbModel>> {
        let machine = sqlx::query_as::<_, OnboardingMachineDbModel>(
            "UPDATE onboarding_machines SET used_at = ? \
             WHERE token_hash = ? AND used_at IS NULL RETURNING *",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::init_memory_pool;

    #[tokio::test]
    async fn test_token_is_one_shot() {
        let pool = init_memory_pool().await.unwrap();
        let repo = SqlxOnboardingRepository::new(pool);

        repo.register("hash-a", Some("web-01")).await.unwrap();

        let first = repo.consume("hash-a").await.unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().hostname.as_deref(), Some("web-01"));

        // A second claim on the same token loses.
        assert!(repo.consume("hash-a").await.unwrap().is_none());
        // Unknown tokens never match.
        assert!(repo.consume("hash-b").await.unwrap().is_none());
    }
}
