use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub segment_store: SegmentStoreConfig,
    pub transcoder: TranscoderConfig,
    pub control_plane: ControlPlaneConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    /// Display name reported by `/status` and the index page
    pub name: String,
    /// Base URL used when building playback URLs (e.g. `https://live.example.com`).
    /// When unset, the request `Host` header is used instead.
    pub public_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8001,
            name: "Livecast Stream Server".to_string(),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentStoreConfig {
    /// Directory holding `<key>.m3u8` manifests and their segments
    pub root: String,
    /// Remove manifests and segments left behind by a previous run
    pub purge_stale_on_startup: bool,
}

impl Default for SegmentStoreConfig {
    fn default() -> Self {
        Self {
            root: "./media/live".to_string(),
            purge_stale_on_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub ffmpeg_path: String,
    pub segment_duration_seconds: u32,
    /// Number of segments kept in the sliding window
    pub playlist_size: u32,
    /// Delay after spawn before checking that the manifest exists
    pub verify_delay_seconds: u64,
    /// Delay after process exit before the manifest is deleted
    pub manifest_grace_seconds: u64,
    /// How long shutdown waits for transcoders to exit
    pub shutdown_grace_seconds: u64,
    /// Stop and unregister a stream whose manifest never appeared
    pub unregister_on_verification_failure: bool,
    pub synthetic: SyntheticSourceConfig,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            segment_duration_seconds: 2,
            playlist_size: 3,
            verify_delay_seconds: 5,
            manifest_grace_seconds: 30,
            shutdown_grace_seconds: 5,
            unregister_on_verification_failure: false,
            synthetic: SyntheticSourceConfig::default(),
        }
    }
}

impl TranscoderConfig {
    #[must_use]
    pub const fn verify_delay(&self) -> Duration {
        Duration::from_secs(self.verify_delay_seconds)
    }

    #[must_use]
    pub const fn manifest_grace(&self) -> Duration {
        Duration::from_secs(self.manifest_grace_seconds)
    }

    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// Parameters of the generated test signal (video test pattern plus sine tone)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticSourceConfig {
    pub duration_seconds: u32,
    pub size: String,
    pub frame_rate: u32,
    pub tone_frequency: u32,
}

impl Default for SyntheticSourceConfig {
    fn default() -> Self {
        Self {
            duration_seconds: 60,
            size: "1280x720".to_string(),
            frame_rate: 30,
            tone_frequency: 1000,
        }
    }
}

/// Outbound start/stop notifications to the chat/admin service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// Endpoint receiving notifications. Empty or unset disables them.
    pub url: Option<String>,
    pub timeout_seconds: u64,
    /// Ingest base advertised as `relayUrl` (`<base>/<key>`)
    pub relay_base_url: String,
    pub default_description: String,
    pub default_thumbnail: String,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            url: Some("http://localhost:3000/api/stream/detect".to_string()),
            timeout_seconds: 5,
            relay_base_url: "rtmp://localhost:1935/live".to_string(),
            default_description: "Stream detected automatically".to_string(),
            default_thumbnail: "https://images.pexels.com/photos/1763075/pexels-photo-1763075.jpeg?auto=compress&cs=tinysrgb&w=800&h=450&dpr=1".to_string(),
        }
    }
}

impl ControlPlaneConfig {
    /// Notification endpoint, `None` when notifications are disabled
    #[must_use]
    pub fn endpoint(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // LIVECAST_SERVER__HTTP_PORT, LIVECAST_TRANSCODER__FFMPEG_PATH, ...
        builder = builder.add_source(
            Environment::with_prefix("LIVECAST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Get HTTP address
    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.http_port)
    }

    /// Check the configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.http_port == 0 {
            errors.push("server.http_port must be greater than 0".to_string());
        }
        if let Some(public_url) = &self.server.public_url {
            if url::Url::parse(public_url).is_err() {
                errors.push(format!("server.public_url is not a valid URL: {public_url}"));
            }
        }
        if self.segment_store.root.trim().is_empty() {
            errors.push("segment_store.root must not be empty".to_string());
        }
        if self.transcoder.ffmpeg_path.trim().is_empty() {
            errors.push("transcoder.ffmpeg_path must not be empty".to_string());
        }
        if self.transcoder.segment_duration_seconds == 0 {
            errors.push("transcoder.segment_duration_seconds must be greater than 0".to_string());
        }
        if self.transcoder.playlist_size == 0 {
            errors.push("transcoder.playlist_size must be greater than 0".to_string());
        }
        if let Some(endpoint) = self.control_plane.endpoint() {
            if url::Url::parse(endpoint).is_err() {
                errors.push(format!("control_plane.url is not a valid URL: {endpoint}"));
            }
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format must be \"json\" or \"pretty\", got \"{}\"",
                self.logging.format
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
