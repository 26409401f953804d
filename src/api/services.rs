use std::collections::BTreeMap;

use axum::{
    Json,
    body::Body,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use serde::Deserialize;
use serde_json::json;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::debug;

use super::{
    models::HealthResponse,
    state::AppState,
    utils::{etag_matches, request_user, truthy, validate_body_size},
};
use crate::api::error::ApiError;
use crate::library::BookId;

#[derive(Debug, Deserialize)]
pub struct ManifestQuery {
    force_reload: Option<String>,
}

/// Rendered manifest of a book format (GET /book-manifest/{book_id}/{fmt})
///
/// Returns the manifest with per-user fields merged in when the render is
/// cached. Otherwise starts (or joins) the render and returns its job status,
/// or the failure of the previous render exactly once.
/// `?force_reload=1` discards the cached render first.
pub async fn book_manifest(
    State(state): State<AppState>,
    Path((book_id, format)): Path<(BookId, String)>,
    Query(query): Query<ManifestQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = request_user(&headers)?;
    let force_reload = truthy(query.force_reload.as_deref());
    let viewer = state.viewer.clone();

    let response = tokio::task::spawn_blocking(move || {
        viewer.book_manifest(book_id, &format, user.as_deref(), force_reload)
    })
    .await??;

    Ok(Json(response))
}

/// One asset of a rendered book
/// (GET /book-file/{book_id}/{fmt}/{size}/{mtime}/{*name})
///
/// The cache key is rebuilt from the path, so links minted for an older
/// version of the book stop resolving once the book changes.
pub async fn book_file(
    State(state): State<AppState>,
    Path((book_id, format, size, mtime, name)): Path<(BookId, String, u64, i64, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let viewer = state.viewer.clone();
    let location = tokio::task::spawn_blocking(move || {
        viewer.asset(book_id, &format.to_uppercase(), size, mtime, &name)
    })
    .await??;

    let etag = HeaderValue::from_str(&location.etag)
        .map_err(|e| ApiError::Internal(format!("invalid etag: {e}")))?;

    if etag_matches(request.headers(), &location.etag) {
        debug!(path = %location.path.display(), "Asset not modified");
        return Ok((StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response());
    }

    let mut response = match ServeFile::new(&location.path).oneshot(request).await {
        Ok(response) => response.map(Body::new),
        Err(never) => match never {},
    };
    // ServeFile answers If-Modified-Since by itself; its 304 carries the tag too
    if response.status().is_success() || response.status() == StatusCode::NOT_MODIFIED {
        response.headers_mut().insert(header::ETAG, etag);
    }
    Ok(response)
}

/// Last read positions keyed `id:FMT` (GET /book-get-last-read-position/{which})
pub async fn get_last_read_position(
    State(state): State<AppState>,
    Path(which): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = request_user(&headers)?;
    let viewer = state.viewer.clone();

    let positions =
        tokio::task::spawn_blocking(move || viewer.last_read_positions(&which, user.as_deref()))
            .await??;

    Ok(Json(positions))
}

/// Store a last read position (POST /book-set-last-read-position/{book_id}/{fmt})
///
/// Body: `{"device": "...", "cfi": "...", "pos_frac": 0.5}`.
pub async fn set_last_read_position(
    State(state): State<AppState>,
    Path((book_id, format)): Path<(BookId, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let user = request_user(&headers)?;
    let body_bytes = read_body(body, state.max_payload_bytes()).await?;
    let viewer = state.viewer.clone();

    tokio::task::spawn_blocking(move || {
        viewer.set_last_read_position(book_id, &format.to_uppercase(), user.as_deref(), &body_bytes)
    })
    .await??;

    Ok(Json(json!({})))
}

/// Positions and annotations per book (GET /book-get-annotations/{which})
pub async fn get_annotations(
    State(state): State<AppState>,
    Path(which): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = request_user(&headers)?;
    let viewer = state.viewer.clone();

    let annotations =
        tokio::task::spawn_blocking(move || viewer.annotations(&which, user.as_deref())).await?;

    Ok(Json(annotations))
}

/// Merge annotations (POST /book-update-annotations/{book_id}/{fmt})
///
/// Body maps an annotation type to a list of annotations.
pub async fn update_annotations(
    State(state): State<AppState>,
    Path((book_id, format)): Path<(BookId, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, ApiError> {
    let user = request_user(&headers)?;
    let body_bytes = read_body(body, state.max_payload_bytes()).await?;
    let viewer = state.viewer.clone();

    tokio::task::spawn_blocking(move || {
        viewer.update_annotations(book_id, &format.to_uppercase(), user.as_deref(), &body_bytes)
    })
    .await??;

    Ok(Json(json!({})))
}

/// Reads request body and validates size
async fn read_body(body: Body, max_size: usize) -> Result<Vec<u8>, ApiError> {
    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes()
        .to_vec();

    validate_body_size(&data, max_size)?;

    Ok(data)
}

/// Health check endpoint (GET /health)
///
/// Reports the cache directory and the render workers, plus the counters
/// and queue occupancy. Returns 503 if a component is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let queue = state.viewer.queue();

    let mut components = BTreeMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert(
        "cache".to_string(),
        component_status(queue.store().root().is_dir()),
    );
    components.insert("workers".to_string(), component_status(queue.runner_healthy()));

    let all_healthy = components.values().all(|status| status == "healthy");
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: component_status(all_healthy),
        components,
        version: env!("CARGO_PKG_VERSION").to_string(),
        metrics: state.metrics.snapshot(),
        queue: queue.snapshot(),
    };

    (status_code, Json(response))
}

fn component_status(healthy: bool) -> String {
    if healthy { "healthy" } else { "unhealthy" }.to_string()
}
