use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

use super::input::build_args;
use super::output::drain_output;
use super::{SupervisorSettings, TranscodeEvent, TranscodeInput};
use crate::error::{StreamError, StreamResult};
use crate::registry::StreamKey;
use crate::segment_store::SegmentStore;

/// Extra time allowed after `termination_timeout` for the forced kill
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Handle to a running engine process.
///
/// Dropping the handle (and with it `stop_tx`) is a stop request.
struct TranscodeProcess {
    process_id: u64,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    stop_tx: oneshot::Sender<()>,
    exited: ExitWatch,
}

/// Resolves once the monitor has reaped the engine process
#[derive(Clone)]
struct ExitWatch(watch::Receiver<bool>);

impl ExitWatch {
    async fn wait(mut self) {
        // A closed channel means the monitor is gone, so the child is too
        let _ = self.0.wait_for(|exited| *exited).await;
    }
}

type ProcessTable = Arc<DashMap<StreamKey, TranscodeProcess>>;

/// Owns the engine processes, at most one per stream key.
pub struct TranscodeSupervisor {
    settings: SupervisorSettings,
    store: Arc<SegmentStore>,
    processes: ProcessTable,
    next_process_id: AtomicU64,
    events: mpsc::UnboundedSender<TranscodeEvent>,
    /// Monitor and drain tasks; waited on during shutdown
    tracker: TaskTracker,
}

impl TranscodeSupervisor {
    #[must_use]
    pub fn new(
        settings: SupervisorSettings,
        store: Arc<SegmentStore>,
    ) -> (Self, mpsc::UnboundedReceiver<TranscodeEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            settings,
            store,
            processes: Arc::new(DashMap::new()),
            next_process_id: AtomicU64::new(1),
            events,
            tracker: TaskTracker::new(),
        };
        (supervisor, events_rx)
    }

    #[must_use]
    pub const fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    #[must_use]
    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    /// Launch the engine for `key`, replacing any process already running
    /// for it. Returns the id of the new process.
    ///
    /// A replaced process has exited (or been killed) before the new one is
    /// spawned, since both write the same manifest. Returns once the process
    /// is spawned; output production is confirmed later through
    /// [`TranscodeEvent::Verified`].
    pub async fn start(&self, key: &StreamKey, input: &TranscodeInput) -> StreamResult<u64> {
        if self.stop_and_wait(key).await {
            info!(stream_key = %key, "Replacing running transcoder");
        }

        let manifest_path = self.store.manifest_path(key);
        let segment_template = self.store.segment_template(key);
        let args = build_args(input, &self.settings, &manifest_path, &segment_template);

        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StreamError::ProcessSpawn {
                key: key.to_string(),
                source,
            })?;

        let process_id = self.next_process_id.fetch_add(1, Ordering::Relaxed);
        let pid = child.id();
        let span = tracing::info_span!("transcoder", stream_key = %key, process_id);

        if let Some(stdout) = child.stdout.take() {
            self.tracker
                .spawn(drain_output(stdout, key.clone(), "stdout").instrument(span.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            self.tracker
                .spawn(drain_output(stderr, key.clone(), "stderr").instrument(span.clone()));
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(false);
        self.processes.insert(
            key.clone(),
            TranscodeProcess {
                process_id,
                pid,
                started_at: Utc::now(),
                stop_tx,
                exited: ExitWatch(exit_rx),
            },
        );

        let lifecycle = ProcessLifecycle {
            key: key.clone(),
            process_id,
            processes: Arc::clone(&self.processes),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            manifest_grace: self.settings.manifest_grace,
            termination_timeout: self.settings.termination_timeout,
        };

        tokio::spawn(
            lifecycle
                .clone()
                .verify_after(self.settings.verify_delay)
                .instrument(span.clone()),
        );
        self.tracker
            .spawn(lifecycle.monitor(child, stop_rx, exit_tx).instrument(span));

        info!(
            stream_key = %key,
            process_id,
            pid = ?pid,
            kind = ?input.kind(),
            manifest = ?manifest_path,
            "Transcoder started"
        );

        Ok(process_id)
    }

    /// Request termination of the process for `key`. Returns false if none
    /// was running. Does not wait for the exit.
    pub fn stop(&self, key: &StreamKey) -> bool {
        match self.processes.remove(key) {
            Some((_, process)) => {
                Self::signal_stop(key, process);
                true
            }
            None => false,
        }
    }

    /// Stop the process for `key` and wait until it is gone. Waits at most
    /// `termination_timeout` plus the time a forced kill takes. Returns false
    /// if none was running.
    pub async fn stop_and_wait(&self, key: &StreamKey) -> bool {
        let Some((_, process)) = self.processes.remove(key) else {
            return false;
        };

        let exited = process.exited.clone();
        let process_id = process.process_id;
        Self::signal_stop(key, process);

        let limit = self.settings.termination_timeout + KILL_WAIT;
        if tokio::time::timeout(limit, exited.wait()).await.is_err() {
            warn!(
                stream_key = %key,
                process_id,
                waited = ?limit,
                "Transcoder still running after stop"
            );
        }
        true
    }

    /// Like [`Self::stop`], but only if `process_id` is still the current
    /// process for `key`.
    pub fn stop_process(&self, key: &StreamKey, process_id: u64) -> bool {
        match self
            .processes
            .remove_if(key, |_, process| process.process_id == process_id)
        {
            Some((_, process)) => {
                Self::signal_stop(key, process);
                true
            }
            None => false,
        }
    }

    fn signal_stop(key: &StreamKey, process: TranscodeProcess) {
        let uptime = Utc::now() - process.started_at;
        debug!(
            stream_key = %key,
            process_id = process.process_id,
            pid = ?process.pid,
            uptime_seconds = uptime.num_seconds(),
            "Stopping transcoder"
        );
        // Err means the monitor already finished
        let _ = process.stop_tx.send(());
    }

    /// Stop every running process. Returns how many were signalled.
    pub fn stop_all(&self) -> usize {
        let keys = self.running_keys();
        keys.iter().filter(|key| self.stop(key)).count()
    }

    #[must_use]
    pub fn is_running(&self, key: &StreamKey) -> bool {
        self.processes.contains_key(key)
    }

    #[must_use]
    pub fn process_id(&self, key: &StreamKey) -> Option<u64> {
        self.processes.get(key).map(|process| process.process_id)
    }

    #[must_use]
    pub fn running_keys(&self) -> Vec<StreamKey> {
        self.processes.iter().map(|entry| entry.key().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Wait until every monitored process has exited and its output drained.
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let finished = tokio::time::timeout(timeout, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();
        finished
    }
}

/// State shared by the per-process background tasks
#[derive(Clone)]
struct ProcessLifecycle {
    key: StreamKey,
    process_id: u64,
    processes: ProcessTable,
    store: Arc<SegmentStore>,
    events: mpsc::UnboundedSender<TranscodeEvent>,
    manifest_grace: Duration,
    termination_timeout: Duration,
}

enum Wake {
    Exited(io::Result<ExitStatus>),
    StopRequested,
}

impl ProcessLifecycle {
    fn is_current(&self) -> bool {
        self.processes
            .get(&self.key)
            .is_some_and(|process| process.process_id == self.process_id)
    }

    fn emit(&self, event: TranscodeEvent) {
        if self.events.send(event).is_err() {
            debug!(stream_key = %self.key, "Event receiver gone, dropping transcoder event");
        }
    }

    async fn verify_after(self, delay: Duration) {
        tokio::time::sleep(delay).await;

        if !self.is_current() {
            debug!(stream_key = %self.key, "Transcoder gone before verification");
            return;
        }

        if self.store.manifest_exists(&self.key).await {
            info!(stream_key = %self.key, "Stream verified, manifest present");
            self.emit(TranscodeEvent::Verified {
                key: self.key.clone(),
                process_id: self.process_id,
            });
        } else {
            warn!(
                stream_key = %self.key,
                delay = ?delay,
                "Transcoder running but no manifest produced"
            );
            self.emit(TranscodeEvent::VerificationFailed {
                key: self.key.clone(),
                process_id: self.process_id,
            });
        }
    }

    async fn monitor(
        self,
        mut child: Child,
        mut stop_rx: oneshot::Receiver<()>,
        exit_tx: watch::Sender<bool>,
    ) {
        let wake = tokio::select! {
            status = child.wait() => Wake::Exited(status),
            _ = &mut stop_rx => Wake::StopRequested,
        };

        let (status, requested) = match wake {
            Wake::Exited(status) => (status, false),
            Wake::StopRequested => (terminate(&mut child, self.termination_timeout).await, true),
        };
        exit_tx.send_replace(true);

        let exit_code = match &status {
            Ok(status) if requested || status.success() => {
                info!(stream_key = %self.key, status = %status, requested, "Transcoder exited");
                status.code()
            }
            Ok(status) => {
                warn!(stream_key = %self.key, status = %status, "Transcoder exited unexpectedly");
                status.code()
            }
            Err(e) => {
                error!(stream_key = %self.key, error = %e, "Failed to wait for transcoder");
                None
            }
        };

        self.processes
            .remove_if(&self.key, |_, process| process.process_id == self.process_id);

        self.emit(TranscodeEvent::Exited {
            key: self.key.clone(),
            process_id: self.process_id,
            exit_code,
            requested,
        });

        let grace = self.manifest_grace;
        tokio::spawn(self.purge_after(grace).in_current_span());
    }

    async fn purge_after(self, grace: Duration) {
        tokio::time::sleep(grace).await;

        // A restarted stream writes to the same manifest path
        if self.processes.contains_key(&self.key) {
            debug!(stream_key = %self.key, "Newer transcoder running, keeping manifest");
            return;
        }

        match self.store.purge_manifest(&self.key).await {
            Ok(true) => info!(stream_key = %self.key, "Purged manifest"),
            Ok(false) => debug!(stream_key = %self.key, "Manifest already gone"),
            Err(e) => warn!(stream_key = %self.key, error = %e, "Failed to purge manifest"),
        }
    }
}

/// Ask the process to finish cleanly, escalating to a kill after `timeout`
async fn terminate(child: &mut Child, timeout: Duration) -> io::Result<ExitStatus> {
    if let Err(e) = request_termination(child) {
        warn!(error = %e, "Failed to signal transcoder, killing it");
        child.start_kill()?;
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(timeout = ?timeout, "Transcoder ignored termination request, killing it");
            child.kill().await?;
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };
    let pid = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor_with(
        ffmpeg_path: &str,
        root: &std::path::Path,
    ) -> (TranscodeSupervisor, mpsc::UnboundedReceiver<TranscodeEvent>) {
        let settings = SupervisorSettings {
            ffmpeg_path: ffmpeg_path.into(),
            verify_delay: Duration::from_millis(50),
            manifest_grace: Duration::from_millis(50),
            ..SupervisorSettings::default()
        };
        TranscodeSupervisor::new(settings, Arc::new(SegmentStore::new(root)))
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_no_process() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _events) =
            supervisor_with("/nonexistent/livecast-transcoder", dir.path());
        let key = StreamKey::parse("test").unwrap();

        let err = supervisor
            .start(&key, &TranscodeInput::relay("rtmp://localhost/live/test"))
            .await
            .unwrap_err();

        assert!(matches!(err, StreamError::ProcessSpawn { .. }));
        assert!(!supervisor.is_running(&key));
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let (supervisor, _events) = supervisor_with("ffmpeg", dir.path());
        let key = StreamKey::parse("idle").unwrap();

        assert!(!supervisor.stop(&key));
        assert!(!supervisor.stop_and_wait(&key).await);
        assert!(!supervisor.stop_process(&key, 1));
        assert_eq!(supervisor.stop_all(), 0);
        assert!(supervisor.wait_for_exit(Duration::from_millis(10)).await);
    }
}
