//! Stream control endpoints
//!
//! - POST /api/start-stream
//! - POST /api/stop-stream
//! - GET  /api/streams/{key}
//!
//! Bodies are parsed by hand so malformed JSON yields the regular error
//! envelope instead of the extractor's plain-text rejection.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use livecast_livestream::{StartRequest, StreamEntry, StreamKey, StreamMetadata, TranscodeInput};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::info;

use super::{AppError, AppResult, AppState};

/// Key used when a start request does not name one
pub const DEFAULT_STREAM_KEY: &str = "test";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartStreamRequest {
    pub stream_key: Option<String>,
    /// Pull from this source instead of generating a test signal
    pub relay_url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub thumbnail: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartStreamResponse {
    pub success: bool,
    pub message: String,
    pub hls_url: String,
    pub stream: StreamEntry,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StopStreamRequest {
    pub stream_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StopStreamResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StreamDetails {
    #[serde(flatten)]
    pub entry: StreamEntry,
    /// Whether a transcoder process currently backs the entry
    pub running: bool,
}

/// An empty body counts as `{}`
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> AppResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    Ok(serde_json::from_slice(body)?)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn relay_input(relay_url: &str) -> AppResult<TranscodeInput> {
    let parsed = url::Url::parse(relay_url)
        .map_err(|e| AppError::bad_request(format!("Invalid relayUrl: {e}")))?;
    if parsed.host_str().is_none() {
        return Err(AppError::bad_request("Invalid relayUrl: missing host"));
    }
    Ok(TranscodeInput::relay(relay_url))
}

/// Start (or restart) a stream
///
/// POST /api/start-stream
pub async fn start_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<StartStreamResponse>> {
    let request: StartStreamRequest = parse_body(&body)?;

    let raw_key = non_empty(request.stream_key);
    let key = StreamKey::parse(raw_key.as_deref().unwrap_or(DEFAULT_STREAM_KEY))?;

    let input = match non_empty(request.relay_url) {
        Some(relay_url) => relay_input(&relay_url)?,
        None => TranscodeInput::Synthetic(
            state
                .orchestrator
                .supervisor()
                .settings()
                .synthetic
                .clone(),
        ),
    };

    let hls_url = state.playback_url(&headers, &key);
    let metadata = StreamMetadata {
        title: non_empty(request.title),
        description: non_empty(request.description),
        thumbnail: non_empty(request.thumbnail),
        relay_url: None,
        playback_url: Some(hls_url.clone()),
    };

    let entry = state
        .orchestrator
        .start_stream(StartRequest::new(key, input).with_metadata(metadata))
        .await?;

    info!(
        stream_key = %entry.key,
        kind = ?entry.kind,
        hls_url = %hls_url,
        "Stream start requested"
    );

    Ok(Json(StartStreamResponse {
        success: true,
        message: format!("Stream {} started", entry.key),
        hls_url,
        stream: entry,
    }))
}

/// Stop a live stream
///
/// POST /api/stop-stream
///
/// Returns once termination has been requested, not once the process exited.
pub async fn stop_stream(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<StopStreamResponse>> {
    let request: StopStreamRequest = parse_body(&body)?;
    let raw_key = non_empty(request.stream_key)
        .ok_or_else(|| AppError::bad_request("streamKey is required"))?;
    let key = StreamKey::parse(&raw_key)?;

    let entry = state.orchestrator.stop_stream(&key).await?;

    Ok(Json(StopStreamResponse {
        success: true,
        message: format!("Stream {} stopped", entry.key),
    }))
}

/// Registry entry for one stream
///
/// GET /api/streams/{key}
pub async fn get_stream(
    State(state): State<AppState>,
    Path(raw_key): Path<String>,
) -> AppResult<Json<StreamDetails>> {
    let key = StreamKey::parse(&raw_key)?;

    let entry = state
        .orchestrator
        .get(&key)
        .ok_or_else(|| AppError::not_found(format!("Stream not found: {key}")))?;
    let running = state.orchestrator.is_running(&key);

    Ok(Json(StreamDetails { entry, running }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body_empty_is_default() {
        let request: StartStreamRequest = parse_body(&Bytes::from_static(b"  \n")).unwrap();
        assert!(request.stream_key.is_none());
    }

    #[test]
    fn test_parse_body_camel_case() {
        let request: StartStreamRequest = parse_body(&Bytes::from_static(
            br#"{"streamKey":"cam","relayUrl":"rtmp://origin/live/cam","title":"Cam"}"#,
        ))
        .unwrap();
        assert_eq!(request.stream_key.as_deref(), Some("cam"));
        assert_eq!(request.relay_url.as_deref(), Some("rtmp://origin/live/cam"));
        assert_eq!(request.title.as_deref(), Some("Cam"));
    }

    #[test]
    fn test_parse_body_invalid_json() {
        let err = parse_body::<StartStreamRequest>(&Bytes::from_static(b"{nope")).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_relay_input_validation() {
        assert!(relay_input("rtmp://origin:1935/live/cam").is_ok());
        assert!(relay_input("not a url").is_err());
        assert!(relay_input("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_non_empty() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some(" a ".to_string())), Some("a".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
