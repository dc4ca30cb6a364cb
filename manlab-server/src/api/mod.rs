//! HTTP and WebSocket API.

pub mod auth;
pub mod error;
pub mod jwt;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};
