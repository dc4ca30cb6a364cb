//! Command type tags and result statuses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Recognized command type tags.
///
/// The string form is the wire representation carried in `ExecuteCommand`
/// frames and persisted in the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    #[serde(rename = "file.list")]
    FileList,
    #[serde(rename = "file.read")]
    FileRead,
    #[serde(rename = "file.zip")]
    FileZip,
    #[serde(rename = "file.stream")]
    FileStream,
    #[serde(rename = "log.read")]
    LogRead,
    #[serde(rename = "log.tail")]
    LogTail,
    #[serde(rename = "terminal.open")]
    TerminalOpen,
    #[serde(rename = "terminal.input")]
    TerminalInput,
    #[serde(rename = "terminal.close")]
    TerminalClose,
    #[serde(rename = "script.run")]
    ScriptRun,
    #[serde(rename = "service.status")]
    ServiceStatus,
    #[serde(rename = "command.cancel")]
    CommandCancel,
}

impl CommandType {
    /// All recognized tags, in wire order.
    pub const ALL: &'static [CommandType] = &[
        CommandType::FileList,
        CommandType::FileRead,
        CommandType::FileZip,
        CommandType::FileStream,
        CommandType::LogRead,
        CommandType::LogTail,
        CommandType::TerminalOpen,
        CommandType::TerminalInput,
        CommandType::TerminalClose,
        CommandType::ScriptRun,
        CommandType::ServiceStatus,
        CommandType::CommandCancel,
    ];

    /// The wire tag for this command type.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::FileList => "file.list",
            CommandType::FileRead => "file.read",
            CommandType::FileZip => "file.zip",
            CommandType::FileStream => "file.stream",
            CommandType::LogRead => "log.read",
            CommandType::LogTail => "log.tail",
            CommandType::TerminalOpen => "terminal.open",
            CommandType::TerminalInput => "terminal.input",
            CommandType::TerminalClose => "terminal.close",
            CommandType::ScriptRun => "script.run",
            CommandType::ServiceStatus => "service.status",
            CommandType::CommandCancel => "command.cancel",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandType {
    type Err = UnknownCommandType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownCommandType(s.to_string()))
    }
}

/// Error returned when a command tag is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown command type: {0}")]
pub struct UnknownCommandType(pub String);

/// Terminal status reported by an agent in `CommandResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Success,
    Failed,
}
