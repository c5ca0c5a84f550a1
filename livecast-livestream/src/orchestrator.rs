// Stream orchestrator - composition root for the live pipeline
//
// Operations on one key are serialized through a per-key async mutex; keys
// never block each other. The registry and the supervisor's process table
// are the only shared state. Supervisor events are consumed by a background
// loop that sends start notifications and cleans up after spontaneous exits.
//
// Every session produces at most one stop notification: whichever path
// removes the registry entry (stop, replacement, exit) sends it.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use livecast_core::config::TranscoderConfig;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

use crate::error::{StreamError, StreamResult};
use crate::notifier::{
    dispatch, NotificationOutcome, StreamAction, StreamNotification, StreamNotifier,
};
use crate::registry::{StreamEntry, StreamKey, StreamMetadata, StreamRegistry};
use crate::segment_store::SegmentStore;
use crate::transcoder::{
    SupervisorSettings, TranscodeEvent, TranscodeInput, TranscodeSupervisor,
};

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub supervisor: SupervisorSettings,
    /// Stop and forget streams whose transcoder produces no manifest in time
    pub unregister_on_verification_failure: bool,
    /// Time running transcoders get to exit during shutdown
    pub shutdown_grace: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&TranscoderConfig::default())
    }
}

impl From<&TranscoderConfig> for OrchestratorSettings {
    fn from(config: &TranscoderConfig) -> Self {
        Self {
            supervisor: SupervisorSettings::from(config),
            unregister_on_verification_failure: config.unregister_on_verification_failure,
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

/// Request to bring a stream live
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub key: StreamKey,
    pub input: TranscodeInput,
    pub metadata: StreamMetadata,
}

impl StartRequest {
    #[must_use]
    pub fn new(key: StreamKey, input: TranscodeInput) -> Self {
        Self {
            key,
            input,
            metadata: StreamMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: StreamMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

pub struct StreamOrchestrator {
    registry: StreamRegistry,
    supervisor: TranscodeSupervisor,
    store: Arc<SegmentStore>,
    notifier: Arc<dyn StreamNotifier>,
    key_locks: DashMap<StreamKey, Arc<Mutex<()>>>,
    unregister_on_verification_failure: bool,
    shutdown_grace: Duration,
}

impl StreamOrchestrator {
    /// Build the orchestrator and spawn its event loop.
    ///
    /// Must be called from within a tokio runtime. The loop ends once the
    /// orchestrator is dropped and all transcoders have exited.
    pub fn spawn(
        store: Arc<SegmentStore>,
        settings: OrchestratorSettings,
        notifier: Arc<dyn StreamNotifier>,
    ) -> Arc<Self> {
        let (supervisor, events) =
            TranscodeSupervisor::new(settings.supervisor, Arc::clone(&store));

        let orchestrator = Arc::new(Self {
            registry: StreamRegistry::new(),
            supervisor,
            store,
            notifier,
            key_locks: DashMap::new(),
            unregister_on_verification_failure: settings.unregister_on_verification_failure,
            shutdown_grace: settings.shutdown_grace,
        });

        let span = tracing::info_span!("stream_events");
        tokio::spawn(
            Self::run_event_loop(Arc::downgrade(&orchestrator), events).instrument(span),
        );

        orchestrator
    }

    #[must_use]
    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    #[must_use]
    pub fn supervisor(&self) -> &TranscodeSupervisor {
        &self.supervisor
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    fn key_lock(&self, key: &StreamKey) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn notify(
        &self,
        action: StreamAction,
        entry: &StreamEntry,
    ) -> JoinHandle<NotificationOutcome> {
        dispatch(
            Arc::clone(&self.notifier),
            StreamNotification::from_entry(action, entry),
        )
    }

    /// Bring `request.key` live.
    ///
    /// A stream already live under the same key is stopped first and its
    /// session ends with a stop notification. Its transcoder has exited before
    /// the new one is spawned. On spawn failure nothing is registered. The start notification is sent later, once the manifest
    /// has been verified.
    pub async fn start_stream(&self, request: StartRequest) -> StreamResult<StreamEntry> {
        let lock = self.key_lock(&request.key);
        let _guard = lock.lock().await;

        if let Some(previous) = self.registry.unregister(&request.key) {
            info!(
                stream_key = %request.key,
                previous_process = previous.process_id,
                "Replacing live stream"
            );
            self.notify(StreamAction::Stop, &previous);
        }

        // Also waits out a process left behind without a registry entry
        let process_id = self.supervisor.start(&request.key, &request.input).await?;

        let mut metadata = request.metadata;
        if metadata.relay_url.is_none() {
            metadata.relay_url = request.input.relay_url().map(str::to_string);
        }

        let entry = self
            .registry
            .register(request.key, request.input.kind(), process_id, metadata);

        info!(
            stream_key = %entry.key,
            process_id,
            kind = ?entry.kind,
            "Stream started"
        );

        Ok(entry)
    }

    /// Take `key` offline. Fails with [`StreamError::StreamNotFound`] if it
    /// is not live.
    pub async fn stop_stream(&self, key: &StreamKey) -> StreamResult<StreamEntry> {
        self.stop_stream_inner(key)
            .await
            .map(|(entry, _notification)| entry)
    }

    async fn stop_stream_inner(
        &self,
        key: &StreamKey,
    ) -> StreamResult<(StreamEntry, JoinHandle<NotificationOutcome>)> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let entry = self.registry.unregister(key);
        let signalled = self.supervisor.stop(key);

        match entry {
            Some(entry) => {
                info!(stream_key = %key, process_id = entry.process_id, "Stream stopped");
                let notification = self.notify(StreamAction::Stop, &entry);
                Ok((entry, notification))
            }
            None => {
                if signalled {
                    warn!(stream_key = %key, "Stopped transcoder without registry entry");
                }
                Err(StreamError::StreamNotFound(key.to_string()))
            }
        }
    }

    #[must_use]
    pub fn get(&self, key: &StreamKey) -> Option<StreamEntry> {
        self.registry.get(key)
    }

    #[must_use]
    pub fn list_active(&self) -> Vec<StreamEntry> {
        self.registry.list_active()
    }

    #[must_use]
    pub fn is_running(&self, key: &StreamKey) -> bool {
        self.supervisor.is_running(key)
    }

    /// Stop every live stream, wait for their stop notifications and give the
    /// transcoders up to the shutdown grace period to exit.
    pub async fn shutdown(&self) {
        let entries = self.registry.list_active();
        info!(streams = entries.len(), "Stopping all streams");

        let mut notifications = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.stop_stream_inner(&entry.key).await {
                Ok((_, notification)) => notifications.push(notification),
                Err(e) => debug!(stream_key = %entry.key, error = %e, "Stream already stopped"),
            }
        }

        let orphans = self.supervisor.stop_all();
        if orphans > 0 {
            warn!(orphans, "Stopped transcoders without registry entries");
        }

        let grace = self.shutdown_grace;
        let drained = tokio::time::timeout(grace, futures::future::join_all(notifications)).await;
        if drained.is_err() {
            warn!(grace = ?grace, "Stop notifications still pending at shutdown");
        }

        if self.supervisor.wait_for_exit(grace).await {
            info!("All transcoders exited");
        } else {
            warn!(grace = ?grace, "Transcoders still running after shutdown grace, killing");
        }
    }

    async fn run_event_loop(
        this: Weak<Self>,
        mut events: mpsc::UnboundedReceiver<TranscodeEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(orchestrator) = this.upgrade() else {
                break;
            };
            orchestrator.handle_event(event).await;
        }
        debug!("Stream event loop finished");
    }

    async fn handle_event(&self, event: TranscodeEvent) {
        // A fast-failing process can report before start_stream registered it;
        // the key lock orders the event after the registration.
        let lock = self.key_lock(event.key());
        let _guard = lock.lock().await;

        match event {
            TranscodeEvent::Verified { key, process_id } => match self.registry.get(&key) {
                Some(entry) if entry.process_id == process_id => {
                    self.notify(StreamAction::Start, &entry);
                }
                _ => debug!(
                    stream_key = %key,
                    process_id,
                    "Ignoring verification of stale process"
                ),
            },
            TranscodeEvent::VerificationFailed { key, process_id } => {
                warn!(stream_key = %key, process_id, "Stream produced no output");
                if !self.unregister_on_verification_failure {
                    return;
                }

                // Session never went live: no stop notification
                if self.registry.unregister_process(&key, process_id).is_some() {
                    self.supervisor.stop_process(&key, process_id);
                    info!(stream_key = %key, process_id, "Unregistered stream without output");
                }
            }
            TranscodeEvent::Exited {
                key,
                process_id,
                exit_code,
                requested,
            } => {
                if let Some(entry) = self.registry.unregister_process(&key, process_id) {
                    warn!(
                        stream_key = %key,
                        process_id,
                        exit_code = ?exit_code,
                        requested,
                        "Transcoder exited, stream is offline"
                    );
                    self.notify(StreamAction::Stop, &entry);
                } else {
                    debug!(stream_key = %key, process_id, "Exit of a stopped or replaced process");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::NoopNotifier;
    use crate::transcoder::SyntheticSource;

    fn orchestrator(root: &std::path::Path) -> Arc<StreamOrchestrator> {
        let mut settings = OrchestratorSettings::default();
        settings.supervisor.ffmpeg_path = "/nonexistent/livecast-transcoder".into();
        settings.shutdown_grace = Duration::from_millis(100);
        StreamOrchestrator::spawn(
            Arc::new(SegmentStore::new(root)),
            settings,
            Arc::new(NoopNotifier),
        )
    }

    #[tokio::test]
    async fn test_spawn_failure_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let key = StreamKey::parse("test").unwrap();

        let err = orchestrator
            .start_stream(StartRequest::new(
                key.clone(),
                TranscodeInput::Synthetic(SyntheticSource::default()),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::ProcessSpawn { .. }));
        assert!(orchestrator.get(&key).is_none());
        assert!(!orchestrator.is_running(&key));
    }

    #[tokio::test]
    async fn test_stop_unknown_stream() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());
        let key = StreamKey::parse("ghost").unwrap();

        let err = orchestrator.stop_stream(&key).await.unwrap_err();
        assert!(matches!(err, StreamError::StreamNotFound(_)));
    }

    #[tokio::test]
    async fn test_shutdown_when_idle() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path());

        orchestrator.shutdown().await;
        assert!(orchestrator.list_active().is_empty());
    }
}
