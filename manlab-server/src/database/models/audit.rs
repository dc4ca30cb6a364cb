//! Audit event database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Append-only record of a control-plane action.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditEventDbModel {
    pub id: String,
    /// Event kind, e.g. "node.offline", "download.completed"
    pub kind: String,
    /// Coarse category: "node", "command", "session", "download", "update"
    pub category: String,
    /// Acting identity; "system" for control loops
    pub actor: String,
    pub node_id: Option<String>,
    pub success: bool,
    pub message: String,
    pub created_at: String,
}

impl AuditEventDbModel {
    pub fn new(
        kind: impl Into<String>,
        category: impl Into<String>,
        actor: impl Into<String>,
        node_id: Option<String>,
        success: bool,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            category: category.into(),
            actor: actor.into(),
            node_id,
            success,
            message: message.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}
