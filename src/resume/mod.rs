//! Resume capability for crawls
//!
//! Persists the committed prefix of every stream so an interrupted crawl
//! continues from the first uncommitted window.

pub mod checkpoint;
pub mod store;

pub use checkpoint::{CheckpointKey, CommittedWindow, CrawlCheckpoint, MAX_RECENT_WINDOWS};
pub use store::{
    load_checkpoint, save_checkpoint, verify_checkpoints, CheckpointHealth, CheckpointStore,
    FileCheckpointStore, CHECKPOINT_DIR,
};

use chrono::{DateTime, Utc};

/// Errors related to checkpoint persistence
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Commit would move the checkpoint backwards
    #[error("checkpoint regression: stored end {current}, attempted {attempted}")]
    Regression {
        /// End currently stored
        current: DateTime<Utc>,
        /// End of the rejected window
        attempted: DateTime<Utc>,
    },

    /// Schema version mismatch
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch {
        /// Expected schema version
        expected: String,
        /// Found schema version
        found: String,
    },

    /// Checkpoint file too large
    #[error("checkpoint file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// Record does not belong where it was found
    #[error("corrupt checkpoint: {0}")]
    Corrupt(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
