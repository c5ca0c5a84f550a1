// Stream registry - single source of truth for "is this stream live"
//
// Entries are created on start and removed on stop or process exit. State is
// process-lifetime only; sources re-announce their streams after a restart.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use livecast_core::StreamKeyValidator;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use crate::error::StreamResult;

/// Validated stream identifier, safe to use as a file name stem and URL segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    /// Validate and wrap a raw key
    pub fn parse(raw: &str) -> StreamResult<Self> {
        StreamKeyValidator::new().validate(raw)?;
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Where the stream's input comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Pulled from an already-running source
    Relay,
    /// Generated test signal
    SyntheticTest,
}

/// Descriptive data carried with a stream and forwarded in notifications
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    /// Upstream source for relayed streams
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEntry {
    pub key: StreamKey,
    pub start_time: DateTime<Utc>,
    pub is_live: bool,
    pub kind: StreamKind,
    /// Transcode process backing this entry
    pub process_id: u64,
    #[serde(flatten)]
    pub metadata: StreamMetadata,
}

#[derive(Debug, Default)]
pub struct StreamRegistry {
    streams: DashMap<StreamKey, StreamEntry>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live stream. An existing entry for the same key is overwritten
    /// (start time reset); callers check [`Self::get`] first if that is unwanted.
    pub fn register(
        &self,
        key: StreamKey,
        kind: StreamKind,
        process_id: u64,
        metadata: StreamMetadata,
    ) -> StreamEntry {
        let entry = StreamEntry {
            key: key.clone(),
            start_time: Utc::now(),
            is_live: true,
            kind,
            process_id,
            metadata,
        };

        if let Some(previous) = self.streams.insert(key, entry.clone()) {
            debug!(
                stream_key = %entry.key,
                previous_process = previous.process_id,
                process_id,
                "Registry entry overwritten"
            );
        }

        entry
    }

    pub fn unregister(&self, key: &StreamKey) -> Option<StreamEntry> {
        self.streams.remove(key).map(|(_, entry)| entry)
    }

    /// Remove the entry only if it still belongs to `process_id`.
    ///
    /// Used by the exit path so a late exit of a replaced process never
    /// removes the entry of its successor.
    pub fn unregister_process(&self, key: &StreamKey, process_id: u64) -> Option<StreamEntry> {
        self.streams
            .remove_if(key, |_, entry| entry.process_id == process_id)
            .map(|(_, entry)| entry)
    }

    #[must_use]
    pub fn get(&self, key: &StreamKey) -> Option<StreamEntry> {
        self.streams.get(key).map(|entry| entry.clone())
    }

    /// Snapshot of all live streams, oldest first
    #[must_use]
    pub fn list_active(&self) -> Vec<StreamEntry> {
        let mut entries: Vec<StreamEntry> = self
            .streams
            .iter()
            .filter(|entry| entry.is_live)
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.key.cmp(&b.key)));
        entries
    }

    #[must_use]
    pub fn active_keys(&self) -> Vec<String> {
        self.list_active()
            .into_iter()
            .map(|entry| entry.key.to_string())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(raw: &str) -> StreamKey {
        StreamKey::parse(raw).unwrap()
    }

    fn plain() -> StreamMetadata {
        StreamMetadata::default()
    }

    #[test]
    fn test_stream_key_rejects_traversal() {
        assert!(StreamKey::parse("test").is_ok());
        assert!(StreamKey::parse("../secret").is_err());
        assert!(StreamKey::parse("a/b").is_err());
        assert!(StreamKey::parse("").is_err());
    }

    #[test]
    fn test_register_and_get() {
        let registry = StreamRegistry::new();
        let entry = registry.register(key("test"), StreamKind::SyntheticTest, 1, plain());

        assert!(entry.is_live);
        assert_eq!(entry.kind, StreamKind::SyntheticTest);
        assert_eq!(registry.get(&key("test")), Some(entry));
        assert!(registry.get(&key("other")).is_none());
    }

    #[test]
    fn test_register_overwrites() {
        let registry = StreamRegistry::new();
        let first = registry.register(key("test"), StreamKind::SyntheticTest, 1, plain());
        let second = registry.register(key("test"), StreamKind::Relay, 2, plain());

        assert_eq!(registry.len(), 1);
        assert!(second.start_time >= first.start_time);
        let current = registry.get(&key("test")).unwrap();
        assert_eq!(current.process_id, 2);
        assert_eq!(current.kind, StreamKind::Relay);
    }

    #[test]
    fn test_unregister_process_ignores_stale_id() {
        let registry = StreamRegistry::new();
        registry.register(key("test"), StreamKind::SyntheticTest, 2, plain());

        assert!(registry.unregister_process(&key("test"), 1).is_none());
        assert!(registry.get(&key("test")).is_some());

        assert!(registry.unregister_process(&key("test"), 2).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_list_active_is_sorted() {
        let registry = StreamRegistry::new();
        registry.register(key("b"), StreamKind::Relay, 1, plain());
        registry.register(key("a"), StreamKind::Relay, 2, plain());

        let keys = registry.active_keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"a".to_string()));
        assert!(keys.contains(&"b".to_string()));

        registry.unregister(&key("a"));
        assert_eq!(registry.active_keys(), vec!["b".to_string()]);
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let registry = StreamRegistry::new();
        let entry = registry.register(key("test"), StreamKind::SyntheticTest, 7, plain());
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["key"], "test");
        assert_eq!(json["isLive"], true);
        assert_eq!(json["kind"], "synthetic_test");
        assert_eq!(json["processId"], 7);
        assert!(json["startTime"].is_string());
        assert!(json.get("title").is_none());
    }

    #[test]
    fn test_entry_flattens_metadata() {
        let registry = StreamRegistry::new();
        let metadata = StreamMetadata {
            title: Some("Launch".to_string()),
            playback_url: Some("http://localhost:8001/live/test.m3u8".to_string()),
            ..StreamMetadata::default()
        };
        let entry = registry.register(key("test"), StreamKind::Relay, 1, metadata);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["title"], "Launch");
        assert_eq!(json["playbackUrl"], "http://localhost:8001/live/test.m3u8");
    }

    #[test]
    fn test_concurrent_distinct_keys() {
        let registry = Arc::new(StreamRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let key = StreamKey::parse(&format!("stream-{i}")).unwrap();
                    registry.register(key.clone(), StreamKind::Relay, i, plain());
                    if i % 2 == 0 {
                        registry.unregister(&key);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 8);
    }
}
