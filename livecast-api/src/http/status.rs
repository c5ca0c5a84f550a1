//! Status endpoints
//!
//! `GET /status` is the machine-readable snapshot, `GET /` a small page for
//! humans with a button that starts the test stream.

use ammonia::clean_text;
use axum::{
    extract::State,
    response::{Html, IntoResponse},
    Json,
};
use chrono::{DateTime, Utc};
use livecast_livestream::StreamEntry;
use serde::Serialize;

use super::streams::DEFAULT_STREAM_KEY;
use super::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub status: &'static str,
    pub server: String,
    pub port: u16,
    /// Keys of all live streams
    pub active_streams: Vec<String>,
    pub streams: Vec<StreamEntry>,
    pub timestamp: DateTime<Utc>,
}

/// GET /status
pub async fn server_status(State(state): State<AppState>) -> Json<ServerStatus> {
    let streams = state.orchestrator.list_active();
    let active_streams = streams.iter().map(|entry| entry.key.to_string()).collect();

    Json(ServerStatus {
        status: "active",
        server: state.config.server.name.clone(),
        port: state.config.server.http_port,
        active_streams,
        streams,
        timestamp: Utc::now(),
    })
}

fn render_index(server_name: &str, port: u16, keys: &[String]) -> String {
    let name = clean_text(server_name);

    let streams = if keys.is_empty() {
        "<p>No active streams</p>".to_string()
    } else {
        let items: String = keys
            .iter()
            .map(|key| {
                let key = clean_text(key);
                format!("<li><a href=\"/live/{key}.m3u8\">{key}</a></li>")
            })
            .collect();
        format!("<ul>{items}</ul>")
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{name}</title>
</head>
<body>
<h1>{name}</h1>
<p>HTTP port: {port}</p>
<h2>Active streams ({count})</h2>
{streams}
<button id="start-test">Start test stream</button>
<pre id="result"></pre>
<script>
document.getElementById('start-test').addEventListener('click', async () => {{
  const response = await fetch('/api/start-stream', {{
    method: 'POST',
    headers: {{ 'Content-Type': 'application/json' }},
    body: JSON.stringify({{ streamKey: '{default_key}' }})
  }});
  document.getElementById('result').textContent = JSON.stringify(await response.json(), null, 2);
  setTimeout(() => location.reload(), 2000);
}});
</script>
</body>
</html>
"#,
        count = keys.len(),
        default_key = DEFAULT_STREAM_KEY,
    )
}

/// GET /
pub async fn index_page(State(state): State<AppState>) -> impl IntoResponse {
    let keys = state.orchestrator.registry().active_keys();
    Html(render_index(
        &state.config.server.name,
        state.config.server.http_port,
        &keys,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_index_lists_keys() {
        let html = render_index("Livecast", 8001, &["cam".to_string(), "test".to_string()]);
        assert!(html.contains("Active streams (2)"));
        assert!(html.contains("<a href=\"/live/cam.m3u8\">cam</a>"));
        assert!(html.contains("/api/start-stream"));
    }

    #[test]
    fn test_render_index_empty() {
        let html = render_index("Livecast", 8001, &[]);
        assert!(html.contains("No active streams"));
    }

    #[test]
    fn test_server_name_is_escaped() {
        let html = render_index("<script>x</script>", 8001, &[]);
        assert!(!html.contains("<script>x</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn test_server_name_cannot_break_attributes() {
        let html = render_index("a\" onload=\"alert(1)", 8001, &[]);
        assert!(!html.contains("\" onload=\""));
    }
}
