//! Checkpoint inspection subcommand

use super::crawl::{handle_resume_verify, load_source};
use super::{CliError, OutputFormat};
use crate::config::parse_key_value_pairs;
use crate::fetcher::stream_keys;
use crate::registry::ConfigRegistry;
use crate::resume::{CheckpointKey, CheckpointStore, FileCheckpointStore};
use clap::Parser;
use std::path::Path;

/// Checkpoint command for inspecting and validating stored progress
#[derive(Parser, Debug)]
pub struct CheckpointCommand {
    /// What to do
    #[command(subcommand)]
    pub action: CheckpointAction,
}

/// Checkpoint actions
#[derive(clap::Subcommand, Debug)]
pub enum CheckpointAction {
    /// Print the checkpoint of every stream of a source
    Show {
        /// Source identifier
        source: String,

        /// Config override as dotted.path=value (repeatable)
        #[arg(short = 'o', long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
    /// Check that every checkpoint file of a source loads
    Verify {
        /// Source identifier
        source: String,

        /// Config override as dotted.path=value (repeatable)
        #[arg(short = 'o', long = "override", value_name = "KEY=VALUE")]
        overrides: Vec<String>,
    },
}

impl CheckpointCommand {
    /// Execute the checkpoint command and return the exit code
    pub async fn execute(&self, config_dir: &Path, format: OutputFormat) -> Result<i32, CliError> {
        match &self.action {
            CheckpointAction::Show { source, overrides } => {
                self.show(config_dir, source, overrides, format).await
            }
            CheckpointAction::Verify { source, overrides } => {
                let overrides = parse_key_value_pairs(overrides)?;
                let (config, _) =
                    load_source(&ConfigRegistry::builtin(), config_dir, source, &overrides)?;
                let valid = handle_resume_verify(&config)?;
                println!("{source}: {valid} valid checkpoint file(s)");
                Ok(0)
            }
        }
    }

    async fn show(
        &self,
        config_dir: &Path,
        source: &str,
        overrides: &[String],
        format: OutputFormat,
    ) -> Result<i32, CliError> {
        let overrides = parse_key_value_pairs(overrides)?;
        let (config, provider) =
            load_source(&ConfigRegistry::builtin(), config_dir, source, &overrides)?;
        let store = FileCheckpointStore::open(config.dst_dir_raw())?;

        let mut records = Vec::new();
        for stream in stream_keys(provider.as_ref()) {
            let key = CheckpointKey::new(config.source_id(), stream.as_deref());
            let checkpoint = store.load(&key).await?;
            match format {
                OutputFormat::Human => match &checkpoint {
                    Some(c) => {
                        println!(
                            "{key}: committed up to {} ({} window(s), updated {})",
                            c.last_completed_end().format("%Y-%m-%dT%H:%M:%SZ"),
                            c.windows_committed(),
                            c.updated_at().format("%Y-%m-%dT%H:%M:%SZ")
                        );
                        if let Some(cursor) = c.last_cursor() {
                            println!("    cursor: {cursor}");
                        }
                        for recent in c.recent() {
                            println!(
                                "    [{}, {}) at {}",
                                recent.start.format("%Y-%m-%dT%H:%M:%SZ"),
                                recent.end.format("%Y-%m-%dT%H:%M:%SZ"),
                                recent.committed_at.format("%Y-%m-%dT%H:%M:%SZ")
                            );
                        }
                    }
                    None => println!("{key}: no checkpoint"),
                },
                OutputFormat::Json => records.push(serde_json::json!({
                    "key": key.to_string(),
                    "checkpoint": checkpoint,
                })),
            }
        }

        if format == OutputFormat::Json {
            let json = serde_json::to_string_pretty(&records)
                .map_err(|e| CliError::OutputError(e.to_string()))?;
            println!("{json}");
        }
        Ok(0)
    }
}
