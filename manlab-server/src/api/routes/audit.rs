//! Audit trail routes.

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;

use crate::api::auth::Requester;
use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::database::models::AuditEventDbModel;

/// Create the audit router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<u32>,
    offset: Option<u32>,
}

async fn list(
    State(state): State<AppState>,
    _requester: Requester,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<AuditEventDbModel>>> {
    let limit = query.limit.unwrap_or(50).min(500);
    let offset = query.offset.unwrap_or(0);
    let events = state.audit_repo.list_recent(limit, offset).await?;
    Ok(Json(events))
}
