//! Segment store delivery
//!
//! `GET /live/{file}` streams manifests and segments straight from disk.
//! The wildcard route captures any remaining path so traversal attempts
//! reach the handler and are rejected there instead of falling through to
//! a generic 404.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use livecast_livestream::SegmentStore;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{AppError, AppResult, AppState};

/// Serve one file from the segment store
///
/// GET /live/{file}
///
/// Segment names are reused when a stream restarts, so nothing is cacheable.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> AppResult<Response> {
    let store = state.orchestrator.store();

    let opened = store.open(&file).await.map_err(|e| {
        warn!(file = %file, error = %e, "Rejected segment store request");
        AppError::from(e)
    })?;

    let Some((handle, len)) = opened else {
        debug!(file = %file, "Segment store file not found");
        return Err(AppError::not_found("File not found"));
    };

    debug!(file = %file, size = len, "Serving segment store file");
    // No Content-Length: the transcoder may still be rewriting the file
    let body = Body::from_stream(ReaderStream::new(handle));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, SegmentStore::content_type(&file))
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .body(body)
        .map(IntoResponse::into_response)
        .map_err(|_| AppError::internal_server_error("Failed to build response"))
}
