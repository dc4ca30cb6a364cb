//! Command queue database models and the output-tail cap.

use agent_proto::CommandType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Default cap for a command's persisted output tail (64 KiB).
pub const MAX_OUTPUT_TAIL: usize = 64 * 1024;

/// Cap for `file.read` responses (32 KiB).
const FILE_READ_OUTPUT_TAIL: usize = 32 * 1024;

/// The output-tail cap for a given command type.
///
/// 64 KiB across the board, with a per-type override map.
pub fn output_tail_cap(command_type: CommandType) -> usize {
    match command_type {
        CommandType::FileRead => FILE_READ_OUTPUT_TAIL,
        _ => MAX_OUTPUT_TAIL,
    }
}

/// Truncate an output tail so the stored value never exceeds `cap` bytes,
/// keeping the end of the output and prepending a truncation marker. The
/// marker's own bytes count against the cap.
pub fn truncate_tail(output: &str, cap: usize) -> String {
    let len = output.len();
    if len <= cap {
        return output.to_string();
    }

    let mut dropped = len - cap;
    loop {
        let marker = format!("…[truncated {} bytes]", dropped);
        if marker.len() + (len - dropped) <= cap {
            // Respect char boundaries when cutting from the head.
            let mut cut = dropped;
            while cut < len && !output.is_char_boundary(cut) {
                cut += 1;
            }
            return format!("…[truncated {} bytes]{}", cut, &output[cut..]);
        }
        // Drop more to make room for the marker itself.
        dropped += marker.len();
    }
}

/// Command queue status values.
///
/// Transitions form a DAG: Queued → Sent → {Success, Failed}, with
/// Queued → {Success, Failed} permitted for synchronous completions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandQueueStatus {
    Queued,
    Sent,
    Success,
    Failed,
}

impl CommandQueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Sent => "SENT",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "SENT" => Some(Self::Sent),
            "SUCCESS" => Some(Self::Success),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Check if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    /// Whether moving to `next` is a legal forward transition.
    pub fn can_transition_to(&self, next: CommandQueueStatus) -> bool {
        match self {
            Self::Queued => matches!(next, Self::Sent | Self::Success | Self::Failed),
            Self::Sent => matches!(next, Self::Success | Self::Failed),
            Self::Success | Self::Failed => false,
        }
    }
}

/// Command queue item database model.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CommandQueueItemDbModel {
    pub id: String,
    pub node_id: String,
    /// Wire tag, e.g. "file.list"
    pub command_type: String,
    /// Opaque JSON payload, bounded at enqueue time
    pub payload: String,
    /// Status: QUEUED, SENT, SUCCESS, FAILED
    pub status: String,
    /// Truncated output tail written on completion
    pub output_log: Option<String>,
    /// ISO 8601 timestamps
    pub created_at: String,
    pub sent_at: Option<String>,
    pub completed_at: Option<String>,
}

impl CommandQueueItemDbModel {
    pub fn status(&self) -> Option<CommandQueueStatus> {
        CommandQueueStatus::parse(&self.status)
    }

    pub fn command_type(&self) -> Option<CommandType> {
        self.command_type.parse().ok()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}
