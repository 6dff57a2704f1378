//! CLI command implementations

pub mod checkpoint;
pub mod crawl;
pub mod error;
pub mod sources;

pub use checkpoint::CheckpointCommand;
pub use crawl::{Cli, Commands, CrawlArgs, OutputFormat, ResumeMode};
pub use error::CliError;
pub use sources::SourcesCommand;
