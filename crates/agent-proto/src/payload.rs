//! Statically declared command payload schemas.
//!
//! Each command type carries exactly one of these shapes. Unknown fields are
//! rejected so drift between server and agent surfaces immediately instead of
//! being silently ignored.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::CommandType;

/// Validate an outbound payload against the static schema for its command
/// type. Unknown fields and shape mismatches are rejected before anything
/// is queued or sent.
pub fn validate_payload(
    command_type: CommandType,
    payload: &serde_json::Value,
) -> Result<(), serde_json::Error> {
    fn check<T: serde::de::DeserializeOwned>(
        payload: &serde_json::Value,
    ) -> Result<(), serde_json::Error> {
        serde_json::from_value::<T>(payload.clone()).map(drop)
    }

    match command_type {
        CommandType::FileList => check::<FileListPayload>(payload),
        CommandType::FileRead => check::<FileReadPayload>(payload),
        CommandType::FileZip => check::<FileZipPayload>(payload),
        CommandType::FileStream => check::<FileStreamPayload>(payload),
        CommandType::LogRead => check::<LogReadPayload>(payload),
        CommandType::LogTail => check::<LogTailPayload>(payload),
        CommandType::TerminalOpen => check::<TerminalOpenPayload>(payload),
        CommandType::TerminalInput => check::<TerminalInputPayload>(payload),
        CommandType::TerminalClose => check::<TerminalClosePayload>(payload),
        CommandType::ScriptRun => check::<ScriptRunPayload>(payload),
        CommandType::ServiceStatus => check::<ServiceStatusPayload>(payload),
        CommandType::CommandCancel => check::<CommandCancelPayload>(payload),
    }
}

/// `file.list` — enumerate a directory inside the session root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileListPayload {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<u32>,
}

/// `file.read` — read a bounded slice of a file as UTF-8 text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileReadPayload {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bytes: Option<u64>,
}

/// `file.zip` — produce a temp archive of the given paths on the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileZipPayload {
    pub download_id: Uuid,
    pub paths: Vec<String>,
    pub max_uncompressed_bytes: u64,
    pub max_file_count: u64,
}

/// `file.stream` — stream a byte range of a file back as chunk frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FileStreamPayload {
    pub stream_id: Uuid,
    pub path: String,
    pub start_offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<u64>,
    pub chunk_size: u64,
}

/// `log.read` — read the tail of a policy-named log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogReadPayload {
    pub path: String,
    pub max_bytes: u64,
}

/// `log.tail` — follow a log file for a bounded duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LogTailPayload {
    pub path: String,
    pub duration_seconds: u64,
    pub max_bytes: u64,
}

/// `terminal.open` — start a shell bound to a terminal session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TerminalOpenPayload {
    pub session_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<u16>,
}

/// `terminal.input` — write keystrokes into an open terminal session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TerminalInputPayload {
    pub session_id: Uuid,
    pub data: String,
}

/// `terminal.close` — tear down the agent-side shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TerminalClosePayload {
    pub session_id: Uuid,
}

/// `script.run` — execute an allow-listed script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScriptRunPayload {
    pub run_id: Uuid,
    pub script: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// `service.status` — report the state of named system services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ServiceStatusPayload {
    pub services: Vec<String>,
}

/// `command.cancel` — abort another in-flight command or stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandCancelPayload {
    pub target_command_id: Uuid,
}

/// One directory entry in a `file.list` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Result shape of `file.list`.
///
/// Older agents reply with a bare entry array; [`FileListResult::parse`]
/// accepts both shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListResult {
    pub entries: Vec<FileEntry>,
    #[serde(default)]
    pub truncated: bool,
}

impl FileListResult {
    /// Parse an agent reply, accepting the legacy bare-array shape.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        match serde_json::from_str::<Self>(raw) {
            Ok(result) => Ok(result),
            Err(_) => {
                let entries: Vec<FileEntry> = serde_json::from_str(raw)?;
                Ok(Self {
                    entries,
                    truncated: false,
                })
            }
        }
    }
}

/// Result shape of `file.read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReadResult {
    pub content: String,
    pub truncated: bool,
    pub total_bytes: u64,
}

/// Result shape of `file.zip`: where the agent staged the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileZipResult {
    pub total_bytes: u64,
    pub temp_file_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_payload_fields_rejected() {
        let raw = r#"{"path": "/etc", "recursive": true}"#;
        assert!(serde_json::from_str::<FileListPayload>(raw).is_err());
    }

    #[test]
    fn test_validate_payload_per_type() {
        let ok = serde_json::json!({"path": "/var", "maxEntries": null});
        assert!(validate_payload(CommandType::FileList, &ok).is_ok());

        // Right shape, wrong type tag.
        assert!(validate_payload(CommandType::TerminalInput, &ok).is_err());

        // Unknown field sneaks in.
        let extra = serde_json::json!({"path": "/var", "follow": true});
        assert!(validate_payload(CommandType::FileList, &extra).is_err());

        let cancel = serde_json::json!({"targetCommandId": Uuid::nil()});
        assert!(validate_payload(CommandType::CommandCancel, &cancel).is_ok());
    }

    #[test]
    fn test_file_stream_payload_keys() {
        let payload = FileStreamPayload {
            stream_id: Uuid::nil(),
            path: "/var/log/syslog".to_string(),
            start_offset: 1_048_576,
            end_offset: None,
            chunk_size: 1_048_576,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["streamId"], Uuid::nil().to_string());
        assert_eq!(value["startOffset"], 1_048_576);
        assert!(value.get("endOffset").is_none());
    }

    #[test]
    fn test_file_list_result_object_shape() {
        let raw = r#"{"entries": [{"name": "a", "path": "/a", "isDir": false, "size": 3}], "truncated": true}"#;
        let result = FileListResult::parse(raw).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert!(result.truncated);
    }

    #[test]
    fn test_file_list_result_legacy_array_shape() {
        let raw = r#"[{"name": "a", "path": "/a", "isDir": true, "size": 0}]"#;
        let result = FileListResult::parse(raw).unwrap();
        assert_eq!(result.entries.len(), 1);
        assert!(result.entries[0].is_dir);
        assert!(!result.truncated);
    }

    #[test]
    fn test_file_list_result_malformed_rejected() {
        assert!(FileListResult::parse("{\"entries\": 3}").is_err());
        assert!(FileListResult::parse("nope").is_err());
    }
}
