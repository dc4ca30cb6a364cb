//! Wire protocol between the ManLab server and its agents.
//!
//! Control messages travel as JSON, one message per WebSocket text frame.
//! Bulk file bytes travel as binary frames encoded by [`chunk`], so large
//! downloads never pass through the JSON layer.

pub mod chunk;
pub mod command;
pub mod message;
pub mod payload;

pub use chunk::{ChunkFrame, ChunkFrameError};
pub use command::{CommandStatus, CommandType};
pub use message::{AgentIdentity, AgentMessage, HeartbeatStats, ServerMessage, TelemetrySnapshot};
pub use payload::{
    CommandCancelPayload, FileEntry, FileListPayload, FileListResult, FileReadPayload,
    FileReadResult, FileStreamPayload, FileZipPayload, FileZipResult, LogReadPayload,
    LogTailPayload, ScriptRunPayload, ServiceStatusPayload, TerminalClosePayload,
    TerminalInputPayload, TerminalOpenPayload,
};
