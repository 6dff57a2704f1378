//! Raw artifact output

pub mod artifact;
pub mod path;

pub use artifact::{
    compute_sha256, ArtifactMeta, ArtifactStore, RawArtifact, RecoveryReport, StagedArtifact,
};
pub use path::{meta_path, ArtifactPathBuilder, STAGING_DIR};

/// Artifact writer errors
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Rename into the final layout failed
    #[error("publish error: {0}")]
    PublishError(String),
}
