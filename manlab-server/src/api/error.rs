//! API error handling.
//!
//! Maps the crate error taxonomy onto the HTTP surface with consistent
//! `{code, message, details?}` bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::Error;

/// Non-standard status for "client closed request".
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that can be converted to HTTP responses.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error.
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Create a 400 Bad Request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Create a 401 Unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Create a 403 Forbidden error.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// Create a 404 Not Found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Create a 409 Conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Create a 499 Client Closed Request error.
    pub fn client_closed(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::from_u16(CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            "CLIENT_CLOSED",
            message,
        )
    }

    /// Create a 500 Internal Server Error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// Create a 503 Service Unavailable error.
    pub fn agent_disconnected(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "AGENT_DISCONNECTED", message)
    }

    /// Create a 504 Gateway Timeout error.
    pub fn agent_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, "AGENT_TIMEOUT", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound { entity_type, id } => {
                ApiError::not_found(format!("{} with id '{}' not found", entity_type, id))
            }
            Error::SessionExpired(msg) => ApiError::not_found(msg),
            Error::Validation(msg) => ApiError::bad_request(msg),
            Error::PathTraversal | Error::PathFormat => ApiError::bad_request(err.to_string()),
            Error::PathOutsideRoot { .. } => ApiError::bad_request(err.to_string()),
            Error::AgentDisconnected => ApiError::agent_disconnected("Agent is not connected"),
            Error::AgentTimeout => {
                ApiError::agent_timeout("Timed out waiting for agent response")
            }
            Error::AgentFailed { output } => ApiError::bad_request(output),
            Error::MalformedAgentResponse => {
                ApiError::bad_request("Agent returned malformed JSON")
            }
            Error::Cancelled => ApiError::client_closed("Operation cancelled"),
            Error::Conflict(msg) => ApiError::conflict(msg),
            Error::Forbidden(msg) => ApiError::forbidden(msg),
            Error::InvalidStateTransition { from, to } => {
                ApiError::conflict(format!("Cannot transition from {} to {}", from, to))
            }
            Error::Configuration(msg) => ApiError::bad_request(msg),
            Error::DatabaseSqlx(e) => {
                tracing::error!("Database error: {}", e);
                ApiError::internal("Database error occurred")
            }
            Error::Database(msg) => {
                tracing::error!("Database error: {}", msg);
                ApiError::internal("Database error occurred")
            }
            Error::Io(e) => {
                tracing::error!("IO error: {}", e);
                ApiError::internal("IO error occurred")
            }
            _ => {
                tracing::error!("Unexpected error: {}", err);
                ApiError::internal("An unexpected error occurred")
            }
        }
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_creation() {
        let err = ApiError::not_found("Node not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "NOT_FOUND");
        assert_eq!(err.message, "Node not found");
    }

    #[test]
    fn test_taxonomy_mapping() {
        let cases: Vec<(Error, u16)> = vec![
            (Error::validation("bad"), 400),
            (Error::PathTraversal, 400),
            (Error::PathFormat, 400),
            (Error::AgentDisconnected, 503),
            (Error::AgentTimeout, 504),
            (
                Error::AgentFailed {
                    output: "x".to_string(),
                },
                400,
            ),
            (Error::MalformedAgentResponse, 400),
            (Error::Cancelled, 499),
            (Error::conflict("busy"), 409),
            (Error::forbidden("no"), 403),
            (Error::not_found("Node", "n1"), 404),
        ];
        for (err, status) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status.as_u16(), status);
        }
    }

    #[test]
    fn test_exact_messages() {
        let timeout: ApiError = Error::AgentTimeout.into();
        assert_eq!(timeout.message, "Timed out waiting for agent response");

        let malformed: ApiError = Error::MalformedAgentResponse.into();
        assert_eq!(malformed.message, "Agent returned malformed JSON");

        let traversal: ApiError = Error::PathTraversal.into();
        assert_eq!(traversal.message, "Path traversal is not allowed.");

        let format: ApiError = Error::PathFormat.into();
        assert_eq!(
            format.message,
            "Virtual paths must not contain ':'. Use '/C/...' on Windows."
        );
    }
}
