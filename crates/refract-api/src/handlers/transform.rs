//! Image serving handlers
//!
//! The option segment is the compact `key_value,...` form; everything after
//! it is the source reference. A query string on the request belongs to a
//! remote source URL and is appended to it.

use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use refract_core::AppError;
use refract_processing::fetch::is_remote;
use refract_processing::{accepts_webp, OptionSet, TransformRequest};
use std::sync::Arc;

fn source_reference(source: String, query: Option<String>) -> String {
    match query {
        Some(query) if !query.is_empty() && is_remote(&source) => format!("{}?{}", source, query),
        _ => source,
    }
}

fn build_request(
    options: &str,
    source: String,
    query: Option<String>,
    headers: &HeaderMap,
) -> Result<TransformRequest, AppError> {
    let source = source_reference(source, query);
    if source.trim().is_empty() {
        return Err(AppError::InvalidInput("Missing source image".to_string()));
    }

    let options = OptionSet::parse(options)?;
    let accept = headers.get(header::ACCEPT).and_then(|h| h.to_str().ok());

    Ok(TransformRequest {
        source,
        options,
        accepts_webp: accepts_webp(accept),
    })
}

/// `GET /upload/{options}/{*source}`: the transformed image bytes.
pub async fn serve_image(
    State(state): State<Arc<AppState>>,
    Path((options, source)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    let request =
        build_request(&options, source, query, &headers).map_err(|e| state.error(e))?;
    let image = state
        .orchestrator
        .transform(&request)
        .await
        .map_err(|e| state.error(e))?;

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, image.content_type)
        .header(header::CACHE_CONTROL, state.cache_control())
        .header(header::CONTENT_LENGTH, image.bytes.len())
        .header(header::VARY, "Accept")
        .header("X-Cache", if image.cache_hit { "HIT" } else { "MISS" })
        .body(Body::from(image.bytes))
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to build response");
            state.error(AppError::Internal(e.to_string()))
        })?;

    Ok(response)
}

/// `GET /path/{options}/{*source}`: the artifact key of the transformation,
/// producing the artifact first when it is not cached yet.
pub async fn artifact_path(
    State(state): State<Arc<AppState>>,
    Path((options, source)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpAppError> {
    let request =
        build_request(&options, source, query, &headers).map_err(|e| state.error(e))?;
    let image = state
        .orchestrator
        .transform(&request)
        .await
        .map_err(|e| state.error(e))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        image.key,
    ))
}
