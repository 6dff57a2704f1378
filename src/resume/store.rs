//! File-backed checkpoint persistence
//!
//! One JSON file per [`CheckpointKey`] under `<dst_dir_raw>/.checkpoints/`.
//! Writes go to a temp file in the same directory, are synced, then renamed
//! over the target, so a reader sees the previous record or the new one and
//! never a partial write. An `fd-lock` lock file next to each record
//! serialises concurrent processes; a per-key async mutex serialises commits
//! inside one process.

use super::checkpoint::{CheckpointKey, CrawlCheckpoint, SCHEMA_VERSION};
use super::CheckpointError;
use crate::FetchWindow;
use async_trait::async_trait;
use fd_lock::RwLock;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Checkpoint directory below a source's raw output directory
pub const CHECKPOINT_DIR: &str = ".checkpoints";

/// Maximum accepted checkpoint file size (1 MiB)
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 1024 * 1024;

/// Durable per-stream progress
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Current checkpoint, `None` before the first commit
    async fn load(&self, key: &CheckpointKey) -> Result<Option<CrawlCheckpoint>, CheckpointError>;

    /// Record `window` as completed and return the updated checkpoint
    ///
    /// Fails with [`CheckpointError::Regression`] if the window ends before
    /// the stored end. Once this returns `Ok`, the commit survives a crash.
    async fn commit(
        &self,
        key: &CheckpointKey,
        window: &FetchWindow,
    ) -> Result<CrawlCheckpoint, CheckpointError>;

    /// Forget all progress for `key`
    async fn reset(&self, key: &CheckpointKey) -> Result<(), CheckpointError>;
}

/// JSON-file checkpoint store
#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    key_locks: Mutex<HashMap<CheckpointKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileCheckpointStore {
    /// Open the store for a source's raw output directory
    pub fn open(dst_dir_raw: &Path) -> Result<Self, CheckpointError> {
        let root = dst_dir_raw.join(CHECKPOINT_DIR);
        std::fs::create_dir_all(&root)
            .map_err(|e| CheckpointError::IoError(format!("{}: {e}", root.display())))?;
        debug!(root = %root.display(), "Opened checkpoint store");
        Ok(Self {
            root,
            key_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding the checkpoint files
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Record path for a key
    pub fn path_for(&self, key: &CheckpointKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Every readable checkpoint in the store, sorted by file name
    pub fn list(&self) -> Result<Vec<CrawlCheckpoint>, CheckpointError> {
        let mut checkpoints = Vec::new();
        for path in checkpoint_files(&self.root)? {
            if let Some(checkpoint) = load_checkpoint(&path)? {
                checkpoints.push(checkpoint);
            }
        }
        Ok(checkpoints)
    }

    fn key_lock(&self, key: &CheckpointKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.clone()).or_default().clone()
    }

    fn load_matching(&self, key: &CheckpointKey) -> Result<Option<CrawlCheckpoint>, CheckpointError> {
        let path = self.path_for(key);
        match load_checkpoint(&path)? {
            Some(checkpoint) if !checkpoint.matches(key) => Err(CheckpointError::Corrupt(format!(
                "{} holds progress for {}/{}",
                path.display(),
                checkpoint.source_id(),
                checkpoint.stream().unwrap_or("-")
            ))),
            other => Ok(other),
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, key: &CheckpointKey) -> Result<Option<CrawlCheckpoint>, CheckpointError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.load_matching(key)
    }

    async fn commit(
        &self,
        key: &CheckpointKey,
        window: &FetchWindow,
    ) -> Result<CrawlCheckpoint, CheckpointError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let checkpoint = match self.load_matching(key)? {
            None => CrawlCheckpoint::first(key, window),
            Some(mut current) => {
                if window.start > current.last_completed_end() {
                    warn!(
                        key = %key,
                        checkpoint_end = %current.last_completed_end(),
                        window = %window,
                        "Committing window past a gap in the checkpointed range"
                    );
                }
                if !current.advance(window)? {
                    return Ok(current);
                }
                current
            }
        };

        save_checkpoint(&self.path_for(key), &checkpoint)?;
        debug!(
            key = %key,
            last_completed_end = %checkpoint.last_completed_end(),
            windows_committed = checkpoint.windows_committed(),
            "Checkpoint committed"
        );
        Ok(checkpoint)
    }

    async fn reset(&self, key: &CheckpointKey) -> Result<(), CheckpointError> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let path = self.path_for(key);
        let lock_file = open_lock_file(&path)?;
        let mut file_lock = RwLock::new(lock_file);
        let _write = file_lock
            .write()
            .map_err(|e| CheckpointError::LockError(format!("Failed to acquire write lock: {e}")))?;

        match std::fs::remove_file(&path) {
            Ok(()) => {
                sync_dir(&self.root);
                info!(key = %key, "Checkpoint reset");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::IoError(format!("{}: {e}", path.display()))),
        }
    }
}

fn open_lock_file(path: &Path) -> Result<std::fs::File, CheckpointError> {
    let lock_path = path.with_extension("lock");
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| CheckpointError::LockError(format!("Failed to create lock file: {e}")))
}

fn sync_dir(dir: &Path) {
    if let Ok(handle) = std::fs::File::open(dir) {
        let _ = handle.sync_all();
    }
}

/// Atomically replace the record at `path`
pub fn save_checkpoint(path: &Path, checkpoint: &CrawlCheckpoint) -> Result<(), CheckpointError> {
    let parent_dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent_dir).map_err(|e| CheckpointError::IoError(e.to_string()))?;

    let json = serde_json::to_string_pretty(checkpoint)
        .map_err(|e| CheckpointError::SerializationError(e.to_string()))?;

    let lock_file = open_lock_file(path)?;
    let mut lock = RwLock::new(lock_file);
    let _guard = lock
        .write()
        .map_err(|e| CheckpointError::LockError(format!("Failed to acquire write lock: {e}")))?;

    let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
        .map_err(|e| CheckpointError::IoError(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(json.as_bytes())
        .map_err(|e| CheckpointError::IoError(format!("Failed to write temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| CheckpointError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| CheckpointError::IoError(format!("Failed to sync temp file: {e}")))?;
    temp_file
        .persist(path)
        .map_err(|e| CheckpointError::IoError(format!("Failed to persist temp file: {e}")))?;

    sync_dir(parent_dir);
    Ok(())
}

/// Read the record at `path`; `None` if it does not exist
pub fn load_checkpoint(path: &Path) -> Result<Option<CrawlCheckpoint>, CheckpointError> {
    if !path.exists() {
        return Ok(None);
    }

    let lock_file = open_lock_file(path)?;
    let lock = RwLock::new(lock_file);
    let _guard = lock
        .read()
        .map_err(|e| CheckpointError::LockError(format!("Failed to acquire read lock: {e}")))?;

    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CheckpointError::IoError(e.to_string())),
    };
    if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
        return Err(CheckpointError::StateTooLarge {
            size: metadata.len(),
            max: MAX_CHECKPOINT_FILE_SIZE,
        });
    }

    let contents =
        std::fs::read_to_string(path).map_err(|e| CheckpointError::IoError(e.to_string()))?;
    let checkpoint: CrawlCheckpoint = serde_json::from_str(&contents).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to deserialize checkpoint");
        CheckpointError::DeserializationError(e.to_string())
    })?;

    if checkpoint.schema_version() != SCHEMA_VERSION {
        return Err(CheckpointError::SchemaVersionMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: checkpoint.schema_version().to_string(),
        });
    }
    Ok(Some(checkpoint))
}

fn checkpoint_files(dir: &Path) -> Result<Vec<PathBuf>, CheckpointError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir)
        .map_err(|e| CheckpointError::IoError(format!("{}: {e}", dir.display())))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| CheckpointError::IoError(e.to_string()))?
            .path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Result of checking one checkpoint file
#[derive(Debug)]
pub struct CheckpointHealth {
    /// File checked
    pub path: PathBuf,
    /// Parsed record, or why it could not be read
    pub result: Result<CrawlCheckpoint, CheckpointError>,
}

/// Load every checkpoint file in `dir` and report which are readable
pub fn verify_checkpoints(dir: &Path) -> Result<Vec<CheckpointHealth>, CheckpointError> {
    let mut report = Vec::new();
    for path in checkpoint_files(dir)? {
        let result = match load_checkpoint(&path) {
            Ok(Some(checkpoint)) => Ok(checkpoint),
            Ok(None) => continue,
            Err(e) => Err(e),
        };
        match &result {
            Ok(_) => debug!(path = %path.display(), "Checkpoint valid"),
            Err(e) => warn!(path = %path.display(), error = %e, "Checkpoint invalid"),
        }
        report.push(CheckpointHealth { path, result });
    }
    Ok(report)
}
