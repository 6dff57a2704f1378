//! CLI command for listing registered data sources

use crate::registry::{ConfigRegistry, SourceRegistration};
use anyhow::{Context, Result};
use clap::Args;
use serde_json::json;

use super::OutputFormat;

/// Sources subcommand
#[derive(Debug, Args)]
pub struct SourcesCommand {
    #[command(subcommand)]
    action: SourcesAction,
}

/// Sources actions
#[derive(Debug, clap::Subcommand)]
enum SourcesAction {
    /// List all registered sources and their config fields
    List {
        /// Output format
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
}

impl SourcesCommand {
    /// Execute the sources command
    pub fn execute(&self) -> Result<()> {
        match &self.action {
            SourcesAction::List { format } => execute_list(&ConfigRegistry::builtin(), *format),
        }
    }
}

fn describe(registration: &SourceRegistration) -> serde_json::Value {
    let defaults = registration.defaults();
    let fields: Vec<_> = registration
        .fields()
        .iter()
        .map(|f| {
            json!({
                "path": f.path,
                "kind": f.kind.name(),
                "required": f.required,
            })
        })
        .collect();

    json!({
        "source_id": registration.source_id(),
        "description": registration.description(),
        "granularity": defaults.granularity.to_string(),
        "rate_limit": {
            "max_requests": defaults.rate_limit.max_requests,
            "window_secs": defaults.rate_limit.window.as_secs(),
            "max_concurrent": defaults.rate_limit.max_concurrent,
        },
        "required_access": registration.required_access(),
        "fields": fields,
    })
}

fn execute_list(registry: &ConfigRegistry, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let sources: Vec<_> = registry.registrations().map(describe).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&sources)
                    .context("Failed to serialize sources to JSON")?
            );
        }
        OutputFormat::Human => {
            println!("Found {} sources:\n", registry.source_ids().len());
            for registration in registry.registrations() {
                let defaults = registration.defaults();
                println!(
                    "{} | {} | granularity={} | {} req/{}s",
                    registration.source_id(),
                    registration.description(),
                    defaults.granularity,
                    defaults.rate_limit.max_requests,
                    defaults.rate_limit.window.as_secs()
                );
                for field in registration.fields() {
                    println!(
                        "    {}{} ({})",
                        field.path,
                        if field.required { " *" } else { "" },
                        field.kind.name()
                    );
                }
            }
        }
    }
    Ok(())
}
