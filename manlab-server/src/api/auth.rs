//! Requester identity extraction.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

use crate::api::error::ApiError;
use crate::api::server::AppState;

/// The authenticated dashboard identity, from the bearer token's subject.
///
/// When no JWT secret is configured (development, tests), requests pass
/// through as "anonymous".
pub struct Requester(pub String);

impl FromRequestParts<AppState> for Requester {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(jwt_service) = &state.jwt_service else {
            return Ok(Requester("anonymous".to_string()));
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .ok_or_else(|| ApiError::unauthorized("Missing Authorization header"))?;

        let claims = jwt_service
            .validate_token(token)
            .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;

        Ok(Requester(claims.sub))
    }
}
