//! OS system-update audit models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// System update workflow status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemUpdateStatus {
    Pending,
    Approved,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl SystemUpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Approval workflow: Pending → Approved|Cancelled; Approved →
    /// InProgress|Cancelled; InProgress → Completed|Failed.
    pub fn can_transition_to(&self, next: SystemUpdateStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Approved | Self::Cancelled),
            Self::Approved => matches!(next, Self::InProgress | Self::Cancelled),
            Self::InProgress => matches!(next, Self::Completed | Self::Failed),
            _ => false,
        }
    }
}

/// One detected batch of applicable OS updates for a node.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SystemUpdateHistoryDbModel {
    pub id: String,
    pub node_id: String,
    /// Status: PENDING, APPROVED, IN_PROGRESS, COMPLETED, FAILED, CANCELLED
    pub status: String,
    /// JSON array of package names
    pub packages: String,
    pub reboot_required: bool,
    /// Who created/approved: "scheduler" or a dashboard identity
    pub actor: String,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub error: Option<String>,
}

impl SystemUpdateHistoryDbModel {
    pub fn status(&self) -> Option<SystemUpdateStatus> {
        SystemUpdateStatus::parse(&self.status)
    }

    pub fn package_list(&self) -> Vec<String> {
        serde_json::from_str(&self.packages).unwrap_or_default()
    }
}

/// Per-history progress log line.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SystemUpdateLogDbModel {
    pub id: String,
    pub history_id: String,
    pub message: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approval_workflow_transitions() {
        use SystemUpdateStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Approved.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Approved));
    }
}
