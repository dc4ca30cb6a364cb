//! Download session state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Download lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DownloadState {
    Created,
    /// Waiting for the agent to stat the file or build the zip.
    Preparing,
    /// Size known (and temp file staged, for zips); streamable.
    Ready,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One download through the control channel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSession {
    pub id: Uuid,
    pub node_id: String,
    /// The file browser session this download was authorized through.
    pub file_browser_session_id: Uuid,
    /// Normalized virtual paths inside the session root.
    pub paths: Vec<String>,
    pub as_zip: bool,
    pub filename: String,
    /// Known once the agent has responded to the prepare command.
    pub total_bytes: Option<u64>,
    pub transferred_bytes: u64,
    /// Agent-side staging path for zips; the agent owns its deletion.
    pub temp_file_path: Option<String>,
    pub state: DownloadState,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl DownloadSession {
    pub fn new(
        node_id: &str,
        file_browser_session_id: Uuid,
        paths: Vec<String>,
        as_zip: bool,
        filename: String,
        requested_by: &str,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id: node_id.to_string(),
            file_browser_session_id,
            paths,
            as_zip,
            filename,
            total_bytes: None,
            transferred_bytes: 0,
            temp_file_path: None,
            state: DownloadState::Created,
            requested_by: requested_by.to_string(),
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }
}
