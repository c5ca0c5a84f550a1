// Module: http
// Segment delivery plus the stream control and status endpoints

pub mod error;
pub mod health;
pub mod live;
pub mod status;
pub mod streams;

use axum::{
    http::{header, HeaderMap},
    routing::{get, post},
    Router,
};
use livecast_core::Config;
use livecast_livestream::{StreamKey, StreamOrchestrator};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<StreamOrchestrator>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(orchestrator: Arc<StreamOrchestrator>, config: Arc<Config>) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Base URL clients reach this server under.
    ///
    /// Configured `public_url` first, then the request `Host` header if it is
    /// a bare `host[:port]`, then localhost on the configured port.
    pub fn public_base_url(&self, headers: &HeaderMap) -> String {
        if let Some(url) = self
            .config
            .server
            .public_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
        {
            return url.trim_end_matches('/').to_string();
        }

        headers
            .get(header::HOST)
            .and_then(|host| host.to_str().ok())
            .and_then(host_base_url)
            .unwrap_or_else(|| format!("http://localhost:{}", self.config.server.http_port))
    }

    pub fn playback_url(&self, headers: &HeaderMap, key: &StreamKey) -> String {
        format!("{}/live/{key}.m3u8", self.public_base_url(headers))
    }
}

/// `http://host[:port]` rebuilt from a `Host` header value. Anything beyond
/// an authority (credentials, path, query) is refused so the value cannot
/// smuggle extra URL parts into notifications.
fn host_base_url(host: &str) -> Option<String> {
    let url = url::Url::parse(&format!("http://{host}")).ok()?;
    let bare = url.username().is_empty()
        && url.password().is_none()
        && url.path() == "/"
        && url.query().is_none()
        && url.fragment().is_none();
    if !bare {
        return None;
    }

    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("http://{host}:{port}"),
        None => format!("http://{host}"),
    })
}

/// Build the complete router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status::index_page))
        .route("/status", get(status::server_status))
        .route("/api/start-stream", post(streams::start_stream))
        .route("/api/stop-stream", post(streams::stop_stream))
        .route("/api/streams/{key}", get(streams::get_stream))
        .route("/live/{*file}", get(live::serve_file))
        .merge(health::create_health_router())
        // Answers every OPTIONS request itself, preflight or not
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use livecast_livestream::{NoopNotifier, OrchestratorSettings, SegmentStore};

    fn state(public_url: Option<&str>) -> AppState {
        let mut config = Config::default();
        config.server.public_url = public_url.map(str::to_string);
        let orchestrator = StreamOrchestrator::spawn(
            Arc::new(SegmentStore::new(std::env::temp_dir())),
            OrchestratorSettings::default(),
            Arc::new(NoopNotifier),
        );
        AppState::new(orchestrator, Arc::new(config))
    }

    #[tokio::test]
    async fn test_public_base_url_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("media.example:8001"));

        assert_eq!(
            state(Some("https://cdn.example/")).public_base_url(&headers),
            "https://cdn.example"
        );
        assert_eq!(
            state(None).public_base_url(&headers),
            "http://media.example:8001"
        );
        assert_eq!(
            state(None).public_base_url(&HeaderMap::new()),
            "http://localhost:8001"
        );
    }

    #[test]
    fn test_host_base_url() {
        assert_eq!(
            host_base_url("Media.Example:8001").as_deref(),
            Some("http://media.example:8001")
        );
        assert_eq!(host_base_url("[::1]:8001").as_deref(), Some("http://[::1]:8001"));
        assert_eq!(host_base_url("example.com:80").as_deref(), Some("http://example.com"));

        for bad in [
            "",
            "evil.example/phish?x=",
            "user@evil.example",
            "evil.example#frag",
            "a b",
            "<script>",
        ] {
            assert_eq!(host_base_url(bad), None, "{bad:?} should be refused");
        }
    }

    #[tokio::test]
    async fn test_forged_host_falls_back_to_localhost() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::HOST,
            HeaderValue::from_static("evil.example/steal?k="),
        );
        assert_eq!(
            state(None).public_base_url(&headers),
            "http://localhost:8001"
        );
    }

    #[tokio::test]
    async fn test_playback_url() {
        let key = StreamKey::parse("test").unwrap();
        assert_eq!(
            state(None).playback_url(&HeaderMap::new(), &key),
            "http://localhost:8001/live/test.m3u8"
        );
    }
}
