//! Script and script-run database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored script runnable on nodes.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScriptDbModel {
    pub id: String,
    pub name: String,
    pub content: String,
    pub timeout_seconds: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Script run status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScriptRunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
}

impl ScriptRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "RUNNING" => Some(Self::Running),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

/// One execution of a script on a node.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ScriptRunDbModel {
    pub id: String,
    pub script_id: String,
    pub node_id: String,
    /// The queued command carrying this run
    pub command_id: String,
    /// Status: PENDING, RUNNING, SUCCESS, FAILED, CANCELLED
    pub status: String,
    pub output_log: Option<String>,
    /// Requester identity, audit only
    pub requested_by: String,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl ScriptRunDbModel {
    pub fn status(&self) -> Option<ScriptRunStatus> {
        ScriptRunStatus::parse(&self.status)
    }
}
