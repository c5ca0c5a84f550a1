//! Control plane notifications
//!
//! Informs an external control plane when a stream goes live or ends.
//! Delivery is best effort: failures are logged and never reach the caller
//! of a stream operation.

use std::sync::Arc;

use async_trait::async_trait;
use livecast_core::config::ControlPlaneConfig;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use crate::registry::{StreamEntry, StreamKey, StreamMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamAction {
    Start,
    Stop,
}

impl StreamAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

/// A lifecycle change of one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamNotification {
    pub action: StreamAction,
    pub key: StreamKey,
    pub metadata: StreamMetadata,
}

impl StreamNotification {
    #[must_use]
    pub fn from_entry(action: StreamAction, entry: &StreamEntry) -> Self {
        Self {
            action,
            key: entry.key.clone(),
            metadata: entry.metadata.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Control plane request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Control plane rejected notification: {0}")]
    Rejected(String),
}

/// Result of one best-effort delivery
#[derive(Debug)]
pub enum NotificationOutcome {
    Delivered,
    /// Notifications are disabled
    Skipped,
    Failed(NotifyError),
}

impl NotificationOutcome {
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

#[async_trait]
pub trait StreamNotifier: Send + Sync {
    /// Deliver one notification
    async fn notify(&self, notification: &StreamNotification) -> Result<(), NotifyError>;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Used when no control plane is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl StreamNotifier for NoopNotifier {
    async fn notify(&self, notification: &StreamNotification) -> Result<(), NotifyError> {
        debug!(
            stream_key = %notification.key,
            action = notification.action.as_str(),
            "Control plane disabled, notification skipped"
        );
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

/// Wire format of the control plane detect endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlanePayload {
    pub action: StreamAction,
    pub stream_key: String,
    pub title: String,
    pub description: String,
    pub thumbnail: String,
    pub relay_url: String,
    pub playback_url: String,
}

#[derive(Debug, Deserialize)]
struct ControlPlaneReply {
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// POSTs JSON notifications to the control plane
pub struct HttpControlPlaneNotifier {
    client: Client,
    endpoint: String,
    relay_base_url: String,
    default_description: String,
    default_thumbnail: String,
}

impl HttpControlPlaneNotifier {
    pub fn new(
        endpoint: impl Into<String>,
        config: &ControlPlaneConfig,
    ) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            relay_base_url: config.relay_base_url.trim_end_matches('/').to_string(),
            default_description: config.default_description.clone(),
            default_thumbnail: config.default_thumbnail.clone(),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fill in defaults for metadata the stream did not provide
    #[must_use]
    pub fn payload(&self, notification: &StreamNotification) -> ControlPlanePayload {
        let key = &notification.key;
        let metadata = &notification.metadata;

        ControlPlanePayload {
            action: notification.action,
            stream_key: key.to_string(),
            title: metadata
                .title
                .clone()
                .unwrap_or_else(|| format!("Stream {key}")),
            description: metadata
                .description
                .clone()
                .unwrap_or_else(|| self.default_description.clone()),
            thumbnail: metadata
                .thumbnail
                .clone()
                .unwrap_or_else(|| self.default_thumbnail.clone()),
            relay_url: metadata
                .relay_url
                .clone()
                .unwrap_or_else(|| format!("{}/{key}", self.relay_base_url)),
            playback_url: metadata.playback_url.clone().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl StreamNotifier for HttpControlPlaneNotifier {
    async fn notify(&self, notification: &StreamNotification) -> Result<(), NotifyError> {
        let payload = self.payload(notification);

        let reply: ControlPlaneReply = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if reply.success {
            Ok(())
        } else {
            Err(NotifyError::Rejected(
                reply.message.unwrap_or_else(|| "no reason given".to_string()),
            ))
        }
    }
}

/// Build the notifier described by `config`, falling back to [`NoopNotifier`]
/// when no endpoint is set or the HTTP client cannot be built.
#[must_use]
pub fn notifier_from_config(config: &ControlPlaneConfig) -> Arc<dyn StreamNotifier> {
    let Some(endpoint) = config.endpoint() else {
        info!("Control plane notifications disabled");
        return Arc::new(NoopNotifier);
    };

    match HttpControlPlaneNotifier::new(endpoint, config) {
        Ok(notifier) => {
            info!(endpoint, "Control plane notifications enabled");
            Arc::new(notifier)
        }
        Err(e) => {
            error!(
                endpoint,
                error = %e,
                "Failed to build control plane client, notifications disabled"
            );
            Arc::new(NoopNotifier)
        }
    }
}

/// Deliver `notification` and log the outcome
pub async fn deliver(
    notifier: &dyn StreamNotifier,
    notification: &StreamNotification,
) -> NotificationOutcome {
    if !notifier.is_enabled() {
        return NotificationOutcome::Skipped;
    }

    match notifier.notify(notification).await {
        Ok(()) => {
            info!(
                stream_key = %notification.key,
                action = notification.action.as_str(),
                "Control plane notified"
            );
            NotificationOutcome::Delivered
        }
        Err(e) => {
            warn!(
                stream_key = %notification.key,
                action = notification.action.as_str(),
                error = %e,
                "Control plane notification failed"
            );
            NotificationOutcome::Failed(e)
        }
    }
}

/// Deliver in the background; callers may drop the handle
pub fn dispatch(
    notifier: Arc<dyn StreamNotifier>,
    notification: StreamNotification,
) -> JoinHandle<NotificationOutcome> {
    let span = tracing::debug_span!(
        "notify",
        stream_key = %notification.key,
        action = notification.action.as_str()
    );
    tokio::spawn(async move { deliver(notifier.as_ref(), &notification).await }.instrument(span))
}
