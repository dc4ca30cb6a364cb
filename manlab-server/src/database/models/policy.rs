//! Remote-tool policy models.
//!
//! Policies are allow-list entries naming a log path or filesystem root a
//! dashboard session may address on a node.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Log viewer policy: one readable log file on a node.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LogViewerPolicyDbModel {
    pub id: String,
    pub node_id: String,
    pub name: String,
    /// Normalized virtual path of the log file
    pub path: String,
    /// Per-request byte limit
    pub max_bytes: i64,
    pub created_at: String,
}

/// File browser policy: one browsable filesystem root on a node.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct FileBrowserPolicyDbModel {
    pub id: String,
    pub node_id: String,
    pub name: String,
    /// Normalized virtual root; "/" grants the whole virtual tree
    pub root_path: String,
    /// Per-request byte limit for reads
    pub max_bytes: i64,
    pub created_at: String,
}
