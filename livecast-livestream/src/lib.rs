// livecast-livestream - stream transcoding orchestration
//
// Architecture:
// - segment_store/  - on-disk manifests and segments, path safety, purge
// - registry/       - in-memory map of live streams
// - transcoder/     - one supervised external transcoding process per key
// - notifier/       - best-effort start/stop notifications to the control plane
// - orchestrator/   - composition of the above with per-key serialization

pub mod error;
pub mod notifier;
pub mod orchestrator;
pub mod registry;
pub mod segment_store;
pub mod transcoder;

pub use error::{StreamError, StreamResult};
pub use notifier::{
    notifier_from_config, HttpControlPlaneNotifier, NoopNotifier, NotificationOutcome,
    NotifyError, StreamAction, StreamNotification, StreamNotifier,
};
pub use orchestrator::{OrchestratorSettings, StartRequest, StreamOrchestrator};
pub use registry::{StreamEntry, StreamKey, StreamKind, StreamMetadata, StreamRegistry};
pub use segment_store::SegmentStore;
pub use transcoder::{
    SupervisorSettings, SyntheticSource, TranscodeEvent, TranscodeInput, TranscodeSupervisor,
};
