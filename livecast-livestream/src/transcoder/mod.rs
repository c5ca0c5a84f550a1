// Transcode process supervision
//
// One external engine process per stream key. Each process gets:
// - two drain tasks for stdout/stderr
// - a monitor task that waits for exit or a stop request
// - a one-shot verification timer
// Lifecycle changes are reported as TranscodeEvent on an unbounded channel.

mod input;
mod output;
mod supervisor;

use std::path::PathBuf;
use std::time::Duration;

use livecast_core::config::TranscoderConfig;

use crate::registry::StreamKey;

pub use input::{SyntheticSource, TranscodeInput};
pub use supervisor::TranscodeSupervisor;

/// Time a stopped process gets to exit after SIGTERM before it is killed
pub const DEFAULT_TERMINATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub ffmpeg_path: PathBuf,
    pub segment_duration_seconds: u32,
    pub playlist_size: u32,
    pub verify_delay: Duration,
    pub manifest_grace: Duration,
    pub termination_timeout: Duration,
    pub synthetic: SyntheticSource,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&TranscoderConfig::default())
    }
}

impl From<&TranscoderConfig> for SupervisorSettings {
    fn from(config: &TranscoderConfig) -> Self {
        Self {
            ffmpeg_path: PathBuf::from(&config.ffmpeg_path),
            segment_duration_seconds: config.segment_duration_seconds,
            playlist_size: config.playlist_size,
            verify_delay: config.verify_delay(),
            manifest_grace: config.manifest_grace(),
            termination_timeout: DEFAULT_TERMINATION_TIMEOUT,
            synthetic: SyntheticSource::from(&config.synthetic),
        }
    }
}

/// Lifecycle events emitted by the supervisor.
///
/// `process_id` identifies one launch; events for a process that has since
/// been replaced carry the old id and must be ignored by consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeEvent {
    /// Manifest present after the verification delay
    Verified { key: StreamKey, process_id: u64 },
    /// Process still running after the verification delay but no manifest
    VerificationFailed { key: StreamKey, process_id: u64 },
    /// Process exited, whether stopped or on its own
    Exited {
        key: StreamKey,
        process_id: u64,
        exit_code: Option<i32>,
        /// Exit was requested through `stop`
        requested: bool,
    },
}

impl TranscodeEvent {
    #[must_use]
    pub const fn key(&self) -> &StreamKey {
        match self {
            Self::Verified { key, .. }
            | Self::VerificationFailed { key, .. }
            | Self::Exited { key, .. } => key,
        }
    }

    #[must_use]
    pub const fn process_id(&self) -> u64 {
        match self {
            Self::Verified { process_id, .. }
            | Self::VerificationFailed { process_id, .. }
            | Self::Exited { process_id, .. } => *process_id,
        }
    }
}
