// Segment store - directory of manifests and rotating segments
//
// Layout: <root>/<key>.m3u8 plus numbered <key>_N.ts segments written by the
// transcoder. Digits never contain '_', so a segment name maps back to exactly
// one key ("a_10.ts" is key "a", "a_1_0.ts" is key "a_1"). The orchestrator never parses manifests; it only resolves,
// serves and eventually deletes files.

use std::io;
use std::path::{Path, PathBuf};

use livecast_core::StreamKeyValidator;
use tokio::fs;

use crate::error::{StreamError, StreamResult};
use crate::registry::StreamKey;

pub const MANIFEST_EXTENSION: &str = "m3u8";
pub const SEGMENT_EXTENSION: &str = "ts";

pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const SEGMENT_CONTENT_TYPE: &str = "video/mp2t";
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Extensions the transcoder produces; only these are swept on startup
const OWNED_EXTENSIONS: &[&str] = &[MANIFEST_EXTENSION, SEGMENT_EXTENSION, "tmp"];

#[derive(Debug, Clone)]
pub struct SegmentStore {
    root: PathBuf,
}

impl SegmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    #[must_use]
    pub fn manifest_file_name(key: &StreamKey) -> String {
        format!("{key}.{MANIFEST_EXTENSION}")
    }

    /// Path the transcoder for `key` writes its manifest to
    #[must_use]
    pub fn manifest_path(&self, key: &StreamKey) -> PathBuf {
        self.root.join(Self::manifest_file_name(key))
    }

    /// Segment name template handed to the transcoder; `%d` is the sequence number
    #[must_use]
    pub fn segment_template(&self, key: &StreamKey) -> PathBuf {
        self.root.join(format!("{key}_%d.{SEGMENT_EXTENSION}"))
    }

    /// Map a requested file name onto a path inside the store.
    ///
    /// Only a single flat file name is accepted: separators, `..` and other
    /// characters outside the stream key alphabet are rejected.
    pub fn resolve(&self, file_name: &str) -> StreamResult<PathBuf> {
        StreamKeyValidator::new()
            .for_field("file_name")
            .with_max_length(255)
            .validate(file_name)
            .map_err(|e| StreamError::InvalidPath(e.to_string()))?;

        Ok(self.root.join(file_name))
    }

    /// Content type by extension
    #[must_use]
    pub fn content_type(file_name: &str) -> &'static str {
        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            Some(MANIFEST_EXTENSION) => MANIFEST_CONTENT_TYPE,
            Some(SEGMENT_EXTENSION) => SEGMENT_CONTENT_TYPE,
            _ => DEFAULT_CONTENT_TYPE,
        }
    }

    /// Open a stored file for streaming. `Ok(None)` if absent or not a regular file.
    pub async fn open(&self, file_name: &str) -> StreamResult<Option<(fs::File, u64)>> {
        let path = self.resolve(file_name)?;

        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            return Ok(None);
        }

        // The transcoder may rotate the file away between stat and open
        match fs::File::open(&path).await {
            Ok(file) => Ok(Some((file, metadata.len()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn manifest_exists(&self, key: &StreamKey) -> bool {
        fs::try_exists(self.manifest_path(key)).await.unwrap_or(false)
    }

    /// Delete the manifest for `key`. Returns `Ok(false)` if it was already gone.
    pub async fn purge_manifest(&self, key: &StreamKey) -> io::Result<bool> {
        match fs::remove_file(self.manifest_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove manifests and segments left over from a previous run.
    ///
    /// Only files with transcoder-owned extensions are touched, so a
    /// misconfigured root does not lose unrelated data.
    pub async fn purge_stale(&self) -> io::Result<usize> {
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(0);
        }

        let mut deleted = 0;
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Ok(file_type) = entry.file_type().await else {
                continue;
            };
            if !file_type.is_file() {
                continue;
            }

            let path = entry.path();
            let owned = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| OWNED_EXTENSIONS.contains(&ext));
            if !owned {
                continue;
            }

            match fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    tracing::trace!("Deleted stale file: {:?}", path);
                }
                Err(e) => tracing::warn!("Failed to delete stale file {:?}: {}", path, e),
            }
        }

        tracing::info!(
            root = ?self.root,
            deleted,
            "Stale segment store sweep completed"
        );

        Ok(deleted)
    }
}
