//! Terminal session database model.
//!
//! Terminal sessions are the only remote-tool sessions persisted; log
//! viewer and file browser sessions live in their services' in-memory
//! caches.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Persisted terminal session row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TerminalSessionDbModel {
    pub id: String,
    pub node_id: String,
    /// Status: OPEN, EXPIRED, CLOSED
    pub status: String,
    pub requested_by: String,
    pub created_at: String,
    pub expires_at: String,
}
