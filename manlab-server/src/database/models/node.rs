//! Node and node-settings database models.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Node status values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Online,
    Offline,
    /// Operator-pinned; never auto-transitioned by the health monitor.
    Maintenance,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "ONLINE",
            Self::Offline => "OFFLINE",
            Self::Maintenance => "MAINTENANCE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ONLINE" => Some(Self::Online),
            "OFFLINE" => Some(Self::Offline),
            "MAINTENANCE" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

/// Node database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NodeDbModel {
    pub id: String,
    pub hostname: String,
    /// OS label as reported by the agent (e.g. "Ubuntu 24.04")
    pub os: String,
    /// Status: ONLINE, OFFLINE, MAINTENANCE
    pub status: String,
    /// ISO 8601 timestamp of the last heartbeat
    pub last_seen: Option<String>,
    pub agent_version: String,
    /// SHA-256 hex of the agent auth key
    pub auth_key_hash: String,
    pub ip_address: Option<String>,
    /// ISO 8601 timestamp when the node enrolled
    pub created_at: String,
}

impl NodeDbModel {
    pub fn status(&self) -> Option<NodeStatus> {
        NodeStatus::parse(&self.status)
    }

    pub fn last_seen_at(&self) -> Option<DateTime<Utc>> {
        self.last_seen
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Approval mode for agent auto-updates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UpdateApproval {
    Automatic,
    Manual,
}

impl UpdateApproval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automatic" => Some(Self::Automatic),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// A per-node HH:MM–HH:MM UTC range gating auto-updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl MaintenanceWindow {
    /// Parse "HH:MM" start/end strings.
    pub fn parse(start: &str, end: &str) -> Option<Self> {
        let start = NaiveTime::parse_from_str(start, "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(end, "%H:%M").ok()?;
        Some(Self { start, end })
    }

    /// Whether the given instant falls inside the window.
    ///
    /// Windows wrapping midnight (e.g. 22:00–04:00) are supported.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let t = at.time();
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }
}

/// Per-node settings row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct NodeSettingsDbModel {
    pub node_id: String,
    /// Master switch for terminal / log viewer / file browser sessions
    pub remote_tools_enabled: bool,
    pub auto_update_enabled: bool,
    /// Approval mode: "automatic" or "manual"
    pub auto_update_approval: String,
    /// Consecutive auto-update failures; auto-update disables at 5
    pub auto_update_failures: i64,
    /// Version recorded for manual approval, if any
    pub pending_agent_version: Option<String>,
    /// Maintenance window start, "HH:MM" UTC
    pub maintenance_window_start: Option<String>,
    /// Maintenance window end, "HH:MM" UTC
    pub maintenance_window_end: Option<String>,
    pub system_update_enabled: bool,
    /// JSON array of selected categories: security / feature / driver
    pub system_update_categories: String,
    pub auto_approve_updates: bool,
}

impl NodeSettingsDbModel {
    /// Default settings for a freshly enrolled node.
    pub fn defaults(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            remote_tools_enabled: true,
            auto_update_enabled: false,
            auto_update_approval: UpdateApproval::Manual.as_str().to_string(),
            auto_update_failures: 0,
            pending_agent_version: None,
            maintenance_window_start: None,
            maintenance_window_end: None,
            system_update_enabled: false,
            system_update_categories: "[\"security\"]".to_string(),
            auto_approve_updates: false,
        }
    }

    pub fn approval(&self) -> UpdateApproval {
        UpdateApproval::parse(&self.auto_update_approval).unwrap_or(UpdateApproval::Manual)
    }

    pub fn maintenance_window(&self) -> Option<MaintenanceWindow> {
        match (
            self.maintenance_window_start.as_deref(),
            self.maintenance_window_end.as_deref(),
        ) {
            (Some(start), Some(end)) => MaintenanceWindow::parse(start, end),
            _ => None,
        }
    }

    /// Whether the node is currently eligible for scheduled update work.
    ///
    /// No configured window means always eligible.
    pub fn in_maintenance_window(&self, at: DateTime<Utc>) -> bool {
        match self.maintenance_window() {
            Some(window) => window.contains(at),
            None => true,
        }
    }

    pub fn update_categories(&self) -> Vec<String> {
        serde_json::from_str(&self.system_update_categories).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_status_round_trip() {
        for status in [
            NodeStatus::Online,
            NodeStatus::Offline,
            NodeStatus::Maintenance,
        ] {
            assert_eq!(NodeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(NodeStatus::parse("BANANA"), None);
    }

    #[test]
    fn test_window_plain_range() {
        let window = MaintenanceWindow::parse("02:00", "04:00").unwrap();
        let inside: DateTime<Utc> = "2026-01-01T03:00:00Z".parse().unwrap();
        let outside: DateTime<Utc> = "2026-01-01T05:00:00Z".parse().unwrap();
        assert!(window.contains(inside));
        assert!(!window.contains(outside));
    }

    #[test]
    fn test_window_wraps_midnight() {
        let window = MaintenanceWindow::parse("22:00", "04:00").unwrap();
        let late: DateTime<Utc> = "2026-01-01T23:30:00Z".parse().unwrap();
        let early: DateTime<Utc> = "2026-01-01T01:00:00Z".parse().unwrap();
        let noon: DateTime<Utc> = "2026-01-01T12:00:00Z".parse().unwrap();
        assert!(window.contains(late));
        assert!(window.contains(early));
        assert!(!window.contains(noon));
    }

    #[test]
    fn test_window_rejects_garbage() {
        assert!(MaintenanceWindow::parse("25:00", "04:00").is_none());
        assert!(MaintenanceWindow::parse("22", "04:00").is_none());
    }

    #[test]
    fn test_settings_no_window_is_always_eligible() {
        let settings = NodeSettingsDbModel::defaults("n1");
        assert!(settings.in_maintenance_window(Utc::now()));
    }

    #[test]
    fn test_default_categories() {
        let settings = NodeSettingsDbModel::defaults("n1");
        assert_eq!(settings.update_categories(), vec!["security".to_string()]);
    }
}
