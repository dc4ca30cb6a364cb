//! Message envelopes for the agent channel.
//!
//! One JSON object per text frame, tagged as `{"type": ..., "payload": ...}`.
//! `StreamChunk` is the exception: it rides a binary frame (see [`crate::chunk`])
//! so chunk payloads never pay for base64.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::{CommandStatus, CommandType};

/// Identity presented by an agent during enrollment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AgentIdentity {
    pub hostname: String,
    pub os: String,
    pub agent_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Periodic liveness report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatStats {
    pub last_seen: DateTime<Utc>,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_pct: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
}

/// Fuller telemetry snapshot, sent less frequently than heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub hostname: String,
    pub os: String,
    pub agent_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    pub cpu_pct: f64,
    pub mem_pct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_pct: Option<f64>,
}

/// Messages sent by an agent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum AgentMessage {
    /// First frame on every connection: either a node auth key or a one-shot
    /// enrollment token, plus the machine identity.
    Enroll {
        #[serde(rename = "authToken")]
        auth_token: String,
        #[serde(rename = "agentIdentity")]
        agent_identity: AgentIdentity,
    },
    Heartbeat(HeartbeatStats),
    Telemetry(TelemetrySnapshot),
    CommandResult {
        #[serde(rename = "commandId")]
        command_id: Uuid,
        status: CommandStatus,
        #[serde(rename = "outputTail")]
        output_tail: String,
    },
    /// End-of-stream marker for a byte stream; chunks themselves are binary
    /// frames.
    StreamEnd {
        #[serde(rename = "streamId")]
        stream_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Messages sent by the server to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    /// Enrollment accepted. `authKey` is present only on first enrollment,
    /// when the server mints a durable key for the new node.
    EnrollAck {
        #[serde(rename = "nodeId")]
        node_id: Uuid,
        #[serde(rename = "authKey", default, skip_serializing_if = "Option::is_none")]
        auth_key: Option<String>,
    },
    ExecuteCommand {
        #[serde(rename = "commandId")]
        command_id: Uuid,
        #[serde(rename = "type")]
        command_type: CommandType,
        payload: serde_json::Value,
    },
    /// Issued on reconnect: every command id still outstanding for this node.
    /// The agent deduplicates by command id.
    ReplayPending {
        #[serde(rename = "commandIds")]
        command_ids: Vec<Uuid>,
    },
}

impl AgentMessage {
    /// Parse a text frame into an agent message.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize into a text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("agent message serialization cannot fail")
    }
}

impl ServerMessage {
    /// Parse a text frame into a server message.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize into a text frame.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server message serialization cannot fail")
    }
}
