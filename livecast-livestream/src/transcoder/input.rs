//! Transcoder invocation
//!
//! Builds the argument list for the external engine. The input half varies
//! with [`TranscodeInput`]; the output half is fixed: low-latency segmented
//! HTTP output with a short rotating window and caching disabled.

use std::ffi::OsString;
use std::path::Path;

use livecast_core::config::SyntheticSourceConfig;

use crate::registry::StreamKind;

use super::SupervisorSettings;

/// Parameters of the generated test signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntheticSource {
    pub duration_seconds: u32,
    pub size: String,
    pub frame_rate: u32,
    pub tone_frequency: u32,
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::from(&SyntheticSourceConfig::default())
    }
}

impl From<&SyntheticSourceConfig> for SyntheticSource {
    fn from(config: &SyntheticSourceConfig) -> Self {
        Self {
            duration_seconds: config.duration_seconds,
            size: config.size.clone(),
            frame_rate: config.frame_rate,
            tone_frequency: config.tone_frequency,
        }
    }
}

/// What the transcoder reads from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeInput {
    /// Pull from an already-running source (e.g. `rtmp://host/live/key`)
    Relay { url: String },
    /// Generated test pattern plus sine tone
    Synthetic(SyntheticSource),
}

impl TranscodeInput {
    pub fn relay(url: impl Into<String>) -> Self {
        Self::Relay { url: url.into() }
    }

    #[must_use]
    pub const fn kind(&self) -> StreamKind {
        match self {
            Self::Relay { .. } => StreamKind::Relay,
            Self::Synthetic(_) => StreamKind::SyntheticTest,
        }
    }

    #[must_use]
    pub fn relay_url(&self) -> Option<&str> {
        match self {
            Self::Relay { url } => Some(url),
            Self::Synthetic(_) => None,
        }
    }

    fn input_args(&self) -> Vec<String> {
        match self {
            Self::Relay { url } => vec!["-i".to_string(), url.clone()],
            Self::Synthetic(source) => vec![
                "-f".to_string(),
                "lavfi".to_string(),
                "-i".to_string(),
                format!(
                    "testsrc=duration={}:size={}:rate={}",
                    source.duration_seconds, source.size, source.frame_rate
                ),
                "-f".to_string(),
                "lavfi".to_string(),
                "-i".to_string(),
                format!(
                    "sine=frequency={}:duration={}",
                    source.tone_frequency, source.duration_seconds
                ),
            ],
        }
    }

    fn codec_args(&self) -> Vec<&'static str> {
        let mut args = vec!["-c:v", "libx264", "-preset", "ultrafast"];
        if matches!(self, Self::Relay { .. }) {
            args.extend(["-tune", "zerolatency"]);
        }
        args.extend(["-c:a", "aac"]);
        args
    }
}

/// Full argument list for one transcoder run writing to `manifest_path`,
/// with segments named after `segment_template`
pub(crate) fn build_args(
    input: &TranscodeInput,
    settings: &SupervisorSettings,
    manifest_path: &Path,
    segment_template: &Path,
) -> Vec<OsString> {
    // -y: a previous run may have left the manifest behind and there is no
    // stdin to answer the overwrite prompt
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y"]
        .into_iter()
        .map(OsString::from)
        .collect();

    args.extend(input.input_args().into_iter().map(OsString::from));
    args.extend(input.codec_args().into_iter().map(OsString::from));

    let segment_duration = settings.segment_duration_seconds.to_string();
    let playlist_size = settings.playlist_size.to_string();
    args.extend(
        [
            "-f",
            "hls",
            "-hls_time",
            segment_duration.as_str(),
            "-hls_list_size",
            playlist_size.as_str(),
            "-hls_flags",
            "delete_segments",
            "-hls_allow_cache",
            "0",
        ]
        .into_iter()
        .map(OsString::from),
    );
    args.push("-hls_segment_filename".into());
    args.push(segment_template.as_os_str().to_os_string());
    args.push(manifest_path.as_os_str().to_os_string());

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args_as_strings(args: &[OsString]) -> Vec<String> {
        args.iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn position(args: &[String], flag: &str) -> usize {
        args.iter()
            .position(|a| a == flag)
            .unwrap_or_else(|| panic!("{flag} missing from {args:?}"))
    }

    #[test]
    fn test_synthetic_args() {
        let settings = SupervisorSettings::default();
        let manifest = PathBuf::from("/srv/live/test.m3u8");
        let args = args_as_strings(&build_args(
            &TranscodeInput::Synthetic(SyntheticSource::default()),
            &settings,
            &manifest,
            Path::new("/srv/live/seg_%d.ts"),
        ));

        assert!(args.contains(&"testsrc=duration=60:size=1280x720:rate=30".to_string()));
        assert!(args.contains(&"sine=frequency=1000:duration=60".to_string()));
        assert!(!args.contains(&"zerolatency".to_string()));
        assert_eq!(args.last().unwrap(), "/srv/live/test.m3u8");
    }

    #[test]
    fn test_relay_args() {
        let settings = SupervisorSettings::default();
        let manifest = PathBuf::from("/srv/live/cam.m3u8");
        let args = args_as_strings(&build_args(
            &TranscodeInput::relay("rtmp://localhost:1935/live/cam"),
            &settings,
            &manifest,
            Path::new("/srv/live/seg_%d.ts"),
        ));

        let input = position(&args, "-i");
        assert_eq!(args[input + 1], "rtmp://localhost:1935/live/cam");
        assert_eq!(args[position(&args, "-tune") + 1], "zerolatency");
        assert!(!args.iter().any(|a| a == "lavfi"));
    }

    #[test]
    fn test_output_contract() {
        let settings = SupervisorSettings {
            segment_duration_seconds: 4,
            playlist_size: 6,
            ..SupervisorSettings::default()
        };
        let args = args_as_strings(&build_args(
            &TranscodeInput::relay("rtmp://src/live/a"),
            &settings,
            Path::new("a.m3u8"),
            Path::new("a_%d.ts"),
        ));

        assert_eq!(args[position(&args, "-f") + 1], "hls");
        assert_eq!(args[position(&args, "-hls_time") + 1], "4");
        assert_eq!(args[position(&args, "-hls_list_size") + 1], "6");
        assert_eq!(args[position(&args, "-hls_flags") + 1], "delete_segments");
        assert_eq!(args[position(&args, "-hls_allow_cache") + 1], "0");
        assert!(args.contains(&"-y".to_string()));
        let template = position(&args, "-hls_segment_filename") + 1;
        assert_eq!(args[template], "a_%d.ts");
        // Manifest stays the final output argument
        assert_eq!(template + 2, args.len());
        assert_eq!(args.last().unwrap(), "a.m3u8");
    }

    #[test]
    fn test_kind() {
        assert_eq!(TranscodeInput::relay("rtmp://x/y").kind(), StreamKind::Relay);
        assert_eq!(
            TranscodeInput::Synthetic(SyntheticSource::default()).kind(),
            StreamKind::SyntheticTest
        );
    }
}
