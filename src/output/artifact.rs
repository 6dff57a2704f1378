//! Raw artifact staging and publication
//!
//! A fetched payload is first written durably under `.staging/`, then the
//! engine commits the window's checkpoint, then [`StagedArtifact::publish`]
//! renames the payload to its final path. Readers of the final layout
//! therefore only see artifacts whose windows are committed. A crash between
//! commit and publish leaves a staged file that [`ArtifactStore::recover`]
//! promotes on the next run; a crash before commit leaves one it deletes.

use super::path::{is_meta_file, meta_path, parse_window_file_name, ArtifactPathBuilder, STAGING_DIR};
use super::ArtifactError;
use crate::fetcher::FetchedPayload;
use crate::FetchWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One validated payload ready to be written
#[derive(Debug, Clone)]
pub struct RawArtifact {
    /// Stream key
    pub stream: Option<String>,
    /// Window the payload covers
    pub window: FetchWindow,
    /// File extension without the dot
    pub extension: String,
    /// Payload and transport metadata
    pub payload: FetchedPayload,
    /// Human-readable request description
    pub request: String,
    /// When the payload was received
    pub fetched_at: DateTime<Utc>,
}

/// Sidecar written next to every payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    /// Source identifier
    pub source_id: String,
    /// Stream key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// Window start
    pub window_start: DateTime<Utc>,
    /// Window end
    pub window_end: DateTime<Utc>,
    /// Hex SHA-256 of the payload
    pub sha256: String,
    /// Payload size
    pub bytes: u64,
    /// Response content type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Response ETag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Request that produced the payload
    pub request: String,
    /// When the payload was received
    pub fetched_at: DateTime<Utc>,
}

/// Hex SHA-256 of a payload
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Outcome of a staging recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Staged artifacts promoted because their window was already committed
    pub published: Vec<PathBuf>,
    /// Staged artifacts removed because their window was not committed
    pub discarded: Vec<PathBuf>,
}

/// Durably staged artifact awaiting publication
#[derive(Debug)]
#[must_use = "a staged artifact must be published or discarded"]
pub struct StagedArtifact {
    staged: PathBuf,
    destination: PathBuf,
    bytes: u64,
}

impl StagedArtifact {
    /// Final payload path
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Payload size
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Move the payload and sidecar to their final paths
    pub fn publish(self) -> Result<PathBuf, ArtifactError> {
        promote(&self.staged, &self.destination)?;
        Ok(self.destination)
    }

    /// Remove the staged files
    pub fn discard(self) {
        remove_staged(&self.staged);
    }
}

/// Writes raw payloads for one source
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    staging_root: PathBuf,
    source_id: String,
}

impl ArtifactStore {
    /// Open the store, creating `dst_dir_raw` and its staging directory
    pub fn open(dst_dir_raw: &Path, source_id: &str) -> Result<Self, ArtifactError> {
        let staging_root = dst_dir_raw.join(STAGING_DIR);
        std::fs::create_dir_all(&staging_root).map_err(|e| {
            ArtifactError::IoError(format!("Failed to create {}: {e}", staging_root.display()))
        })?;
        Ok(Self {
            root: dst_dir_raw.to_path_buf(),
            staging_root,
            source_id: source_id.to_string(),
        })
    }

    /// Raw output directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final payload path for a window
    pub fn artifact_path(&self, stream: Option<&str>, window: &FetchWindow, extension: &str) -> PathBuf {
        self.paths(&self.root, stream, extension).build(window)
    }

    fn paths(&self, root: &Path, stream: Option<&str>, extension: &str) -> ArtifactPathBuilder {
        ArtifactPathBuilder::new(root.to_path_buf(), &self.source_id)
            .with_stream(stream)
            .with_extension(extension)
    }

    /// Write payload and sidecar durably to the staging area
    pub fn stage(&self, artifact: &RawArtifact) -> Result<StagedArtifact, ArtifactError> {
        let stream = artifact.stream.as_deref();
        let staged = self
            .paths(&self.staging_root, stream, &artifact.extension)
            .build(&artifact.window);
        let destination = self.artifact_path(stream, &artifact.window, &artifact.extension);

        let bytes = &artifact.payload.bytes;
        let meta = ArtifactMeta {
            source_id: self.source_id.clone(),
            stream: artifact.stream.clone(),
            window_start: artifact.window.start,
            window_end: artifact.window.end,
            sha256: compute_sha256(bytes),
            bytes: bytes.len() as u64,
            content_type: artifact.payload.content_type.clone(),
            etag: artifact.payload.etag.clone(),
            request: artifact.request.clone(),
            fetched_at: artifact.fetched_at,
        };
        let meta_json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| ArtifactError::SerializationError(e.to_string()))?;

        write_durably(&meta_path(&staged), &meta_json)?;
        write_durably(&staged, bytes)?;

        debug!(
            staged = %staged.display(),
            bytes = meta.bytes,
            sha256 = %meta.sha256,
            "Artifact staged"
        );

        Ok(StagedArtifact {
            staged,
            destination,
            bytes: meta.bytes,
        })
    }

    /// Reconcile leftovers from an interrupted run
    ///
    /// Staged payloads whose window ends at or before `committed_end` are
    /// published; everything else in the stream's staging directory is
    /// deleted.
    pub fn recover(
        &self,
        stream: Option<&str>,
        committed_end: Option<DateTime<Utc>>,
    ) -> Result<RecoveryReport, ArtifactError> {
        let staging_dir = self.paths(&self.staging_root, stream, "bin").directory();
        let mut report = RecoveryReport::default();
        if !staging_dir.is_dir() {
            return Ok(report);
        }

        let entries = std::fs::read_dir(&staging_dir)
            .map_err(|e| ArtifactError::IoError(format!("{}: {e}", staging_dir.display())))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ArtifactError::IoError(e.to_string()))?;
            let path = entry.path();
            if path.is_file() && !is_meta_file(&path) {
                files.push(path);
            }
        }
        files.sort();

        for staged in files {
            let window = staged
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| parse_window_file_name(&self.source_id, n));

            match (window, committed_end) {
                (Some((_, end)), Some(committed)) if end <= committed => {
                    let relative = staged.strip_prefix(&self.staging_root).map_err(|e| {
                        ArtifactError::IoError(format!("{}: {e}", staged.display()))
                    })?;
                    let destination = self.root.join(relative);
                    promote(&staged, &destination)?;
                    info!(artifact = %destination.display(), "Published committed staged artifact");
                    report.published.push(destination);
                }
                _ => {
                    remove_staged(&staged);
                    debug!(staged = %staged.display(), "Discarded uncommitted staged artifact");
                    report.discarded.push(staged);
                }
            }
        }

        Ok(report)
    }
}

/// Write `data` to `path` through a synced temp file
fn write_durably(path: &Path, data: &[u8]) -> Result<(), ArtifactError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| ArtifactError::IoError(format!("Failed to create {}: {e}", parent.display())))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| ArtifactError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(data)
        .map_err(|e| ArtifactError::IoError(format!("Failed to write temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| ArtifactError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| ArtifactError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| ArtifactError::IoError(format!("Failed to persist temp file: {e}")))?;

    sync_dir(parent);
    Ok(())
}

/// Rename a staged payload and its sidecar into place
///
/// The sidecar moves first, so a visible payload always has its metadata.
fn promote(staged: &Path, destination: &Path) -> Result<(), ArtifactError> {
    let parent = destination.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|e| ArtifactError::IoError(format!("Failed to create {}: {e}", parent.display())))?;

    let staged_meta = meta_path(staged);
    if staged_meta.exists() {
        std::fs::rename(&staged_meta, meta_path(destination))
            .map_err(|e| ArtifactError::PublishError(format!("{}: {e}", staged_meta.display())))?;
    } else {
        warn!(staged = %staged.display(), "Staged artifact has no metadata sidecar");
    }
    std::fs::rename(staged, destination)
        .map_err(|e| ArtifactError::PublishError(format!("{}: {e}", staged.display())))?;

    sync_dir(parent);
    Ok(())
}

fn remove_staged(staged: &Path) {
    for path in [staged.to_path_buf(), meta_path(staged)] {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove staged file");
            }
        }
    }
}

fn sync_dir(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}
