//! Control-plane events for dashboards and notification channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Broadcast channel capacity for dashboard events.
const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Events fanned out to the dashboard group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DashboardEvent {
    NodeStatusChanged {
        #[serde(rename = "nodeId")]
        node_id: String,
        status: String,
        #[serde(rename = "lastSeen")]
        last_seen: Option<DateTime<Utc>>,
    },
    PendingUpdateCreated {
        #[serde(rename = "nodeId")]
        node_id: String,
        version: String,
    },
    SystemUpdateDetected {
        #[serde(rename = "nodeId")]
        node_id: String,
        #[serde(rename = "historyId")]
        history_id: String,
        packages: Vec<String>,
    },
    DownloadProgress {
        #[serde(rename = "downloadId")]
        download_id: String,
        #[serde(rename = "transferredBytes")]
        transferred_bytes: u64,
        #[serde(rename = "totalBytes")]
        total_bytes: Option<u64>,
    },
}

/// Broadcasts dashboard events to all subscribed sockets.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<DashboardEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    /// Send an event; silently ignored when no dashboard is listening.
    pub fn broadcast(&self, event: DashboardEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Priority for outbound notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for NotificationPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Events delivered through notification channels (e.g. Discord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotificationEvent {
    NodeOffline {
        node_id: String,
        hostname: String,
        last_seen: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },
    NodeEnrolled {
        node_id: String,
        hostname: String,
        timestamp: DateTime<Utc>,
    },
    PendingAgentUpdate {
        node_id: String,
        hostname: String,
        version: String,
        timestamp: DateTime<Utc>,
    },
    AutoUpdateDisabled {
        node_id: String,
        hostname: String,
        consecutive_failures: i64,
        timestamp: DateTime<Utc>,
    },
    SystemUpdatesDetected {
        node_id: String,
        hostname: String,
        package_count: usize,
        timestamp: DateTime<Utc>,
    },
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::NodeOffline { .. } => "node_offline",
            Self::NodeEnrolled { .. } => "node_enrolled",
            Self::PendingAgentUpdate { .. } => "pending_agent_update",
            Self::AutoUpdateDisabled { .. } => "auto_update_disabled",
            Self::SystemUpdatesDetected { .. } => "system_updates_detected",
        }
    }

    pub fn priority(&self) -> NotificationPriority {
        match self {
            Self::NodeOffline { .. } => NotificationPriority::High,
            Self::AutoUpdateDisabled { .. } => NotificationPriority::High,
            Self::NodeEnrolled { .. } => NotificationPriority::Normal,
            Self::PendingAgentUpdate { .. } => NotificationPriority::Normal,
            Self::SystemUpdatesDetected { .. } => NotificationPriority::Normal,
        }
    }

    pub fn title(&self) -> String {
        match self {
            Self::NodeOffline { hostname, .. } => format!("{} is offline", hostname),
            Self::NodeEnrolled { hostname, .. } => format!("{} enrolled", hostname),
            Self::PendingAgentUpdate { hostname, version, .. } => {
                format!("{}: agent update {} awaiting approval", hostname, version)
            }
            Self::AutoUpdateDisabled { hostname, .. } => {
                format!("{}: auto-update disabled", hostname)
            }
            Self::SystemUpdatesDetected { hostname, package_count, .. } => {
                format!("{}: {} OS updates available", hostname, package_count)
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::NodeOffline { last_seen, .. } => match last_seen {
                Some(seen) => format!("No heartbeat since {}", seen.to_rfc3339()),
                None => "No heartbeat received".to_string(),
            },
            Self::NodeEnrolled { node_id, .. } => format!("New node {}", node_id),
            Self::PendingAgentUpdate { version, .. } => {
                format!("Version {} recorded for manual approval", version)
            }
            Self::AutoUpdateDisabled {
                consecutive_failures,
                ..
            } => format!(
                "Disabled after {} consecutive failed update attempts",
                consecutive_failures
            ),
            Self::SystemUpdatesDetected { package_count, .. } => {
                format!("{} packages match the selected categories", package_count)
            }
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::NodeOffline { timestamp, .. }
            | Self::NodeEnrolled { timestamp, .. }
            | Self::PendingAgentUpdate { timestamp, .. }
            | Self::AutoUpdateDisabled { timestamp, .. }
            | Self::SystemUpdatesDetected { timestamp, .. } => *timestamp,
        }
    }
}
