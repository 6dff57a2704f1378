//! CLI error types and conversions

use crate::config::ConfigError;
use crate::downloader::CrawlError;
use crate::metrics::MetricsError;
use crate::resume::CheckpointError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Config or registry error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// Crawl infrastructure error
    #[error("crawl error: {0}")]
    CrawlError(#[from] CrawlError),

    /// Checkpoint error
    #[error("checkpoint error: {0}")]
    CheckpointError(#[from] CheckpointError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Stored checkpoints failed verification
    #[error("checkpoint verification failed: {0}")]
    VerificationFailed(String),

    /// Report could not be rendered
    #[error("output error: {0}")]
    OutputError(String),
}
