//! Download routes.
//!
//! `POST /api/devices/{node_id}/downloads` creates a download against a
//! file browser session; `GET /api/downloads/{id}/stream` serves the bytes
//! with Range support and chunked transfer.

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::api::auth::Requester;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::sessions::SessionKind;
use crate::streaming::sanitize_disposition_filename;

/// Routes nested under `/api/devices/{node_id}/downloads`.
pub fn device_router() -> Router<AppState> {
    Router::new().route("/", post(create))
}

/// Routes nested under `/api/downloads`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{download_id}/stream", get(stream))
        .route("/{download_id}/status", get(status))
        .route("/{download_id}", axum::routing::delete(cancel))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    session_id: Uuid,
    paths: Vec<String>,
    as_zip: Option<bool>,
}

async fn create(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(node_id): Path<String>,
    Json(request): Json<CreateRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = state
        .sessions
        .try_get(request.session_id, SessionKind::FileBrowser)
        .ok_or_else(|| ApiError::not_found("Session not found or expired"))?;
    if session.node_id != node_id {
        return Err(ApiError::not_found("Session not found or expired"));
    }

    let download = state
        .downloads
        .create_download(&session, &request.paths, request.as_zip, &requester)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "downloadId": download.id,
            "streamUrl": format!("/api/downloads/{}/stream", download.id),
            "status": download.state,
        })),
    ))
}

async fn stream(
    State(state): State<AppState>,
    _requester: Requester,
    Path(download_id): Path<Uuid>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let prepared = state
        .downloads
        .stream(download_id, range_header.as_deref())
        .await?;

    let mut response_headers = HeaderMap::new();
    let filename = sanitize_disposition_filename(&prepared.filename);
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(if prepared.as_zip {
            "application/zip"
        } else {
            "application/octet-stream"
        }),
    );
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(header::CONTENT_LENGTH, prepared.content_length.into());
    if let Some(content_range) = &prepared.content_range
        && let Ok(value) = HeaderValue::from_str(content_range)
    {
        response_headers.insert(header::CONTENT_RANGE, value);
    }

    let status = if prepared.partial {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let mut response = (status, Body::from_stream(prepared.body)).into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}

async fn status(
    State(state): State<AppState>,
    _requester: Requester,
    Path(download_id): Path<Uuid>,
) -> ApiResult<Json<crate::streaming::DownloadSession>> {
    let download = state.downloads.status(download_id)?;
    Ok(Json(download))
}

async fn cancel(
    State(state): State<AppState>,
    Requester(requester): Requester,
    Path(download_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let download = state.downloads.cancel(download_id, &requester).await?;
    Ok(Json(json!({
        "downloadId": download.id,
        "status": download.state,
    })))
}
