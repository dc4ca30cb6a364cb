//! Enrollment token database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A machine pre-registered for enrollment with a one-shot token.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OnboardingMachineDbModel {
    pub id: String,
    /// SHA-256 hex of the enrollment token
    pub token_hash: String,
    /// Expected hostname, informational only
    pub hostname: Option<String>,
    pub created_at: String,
    /// Set when the token is consumed; a used token never enrolls again
    pub used_at: Option<String>,
}
