//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(#[from] sqlx::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Session expired or not found: {0}")]
    SessionExpired(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Path traversal is not allowed.")]
    PathTraversal,

    #[error("Virtual paths must not contain ':'. Use '/C/...' on Windows.")]
    PathFormat,

    #[error("Path '{path}' is outside the session root")]
    PathOutsideRoot { path: String },

    #[error("Agent is not connected")]
    AgentDisconnected,

    #[error("Timed out waiting for agent response")]
    AgentTimeout,

    #[error("Agent reported failure: {output}")]
    AgentFailed { output: String },

    #[error("Agent returned malformed JSON")]
    MalformedAgentResponse,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authorization denied: {0}")]
    Forbidden(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }
}
