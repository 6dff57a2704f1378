//! Crawl command implementation

use crate::config::{parse_key_value_pairs, SourceConfig};
use crate::downloader::{
    CrawlEngine, CrawlError, CrawlProgress, SourceReport, EXIT_CANCELLED,
};
use crate::fetcher::{stream_keys, Provider};
use crate::metrics::init_metrics;
use crate::registry::ConfigRegistry;
use crate::resume::{verify_checkpoints, CheckpointKey, CheckpointStore, FileCheckpointStore};
use crate::shutdown::SharedShutdown;
use crate::{parse_utc_timestamp, TimeRange};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

use super::CliError;

/// Maximum allowed number of sources crawled at once
const MAX_CONCURRENCY: usize = 32;

/// Parse and validate concurrency value
fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

/// Parse `YYYY-MM-DD` or RFC 3339 into a UTC instant
fn parse_date(input: &str) -> Result<DateTime<Utc>, String> {
    parse_utc_timestamp(input)
        .ok_or_else(|| format!("'{input}' is not a YYYY-MM-DD date or RFC 3339 timestamp"))
}

/// Checkpoint handling before a crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeMode {
    /// Continue from existing checkpoints
    On,
    /// Delete the source's checkpoints and start from the requested start
    Reset,
    /// Check checkpoint integrity before crawling
    Verify,
}

impl FromStr for ResumeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on" => Ok(ResumeMode::On),
            "reset" => Ok(ResumeMode::Reset),
            "verify" => Ok(ResumeMode::Verify),
            _ => Err(format!(
                "Invalid resume mode: {s}. Valid options: on, reset, verify"
            )),
        }
    }
}

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

/// Grid Data Downloader CLI
#[derive(Parser, Debug)]
#[command(name = "grid-data-downloader")]
#[command(about = "Resumable backfills of energy-market and weather data", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding one `<source>.yaml` per source
    #[arg(long, global = true, default_value = "configs")]
    pub config_dir: PathBuf,

    /// Resume mode: on, reset, or verify
    #[arg(long, global = true, default_value = "on")]
    pub resume: ResumeMode,

    /// Number of sources crawled concurrently (default: 4, max: 32)
    ///
    /// Every source keeps its own rate limiter, so raising this never
    /// exceeds a provider's budget.
    #[arg(long, global = true, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,

    /// Output format for crawl reports and checkpoints
    #[arg(long, global = true, value_enum, default_value = "human")]
    pub output_format: OutputFormat,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Backfill one or more sources
    Crawl(CrawlArgs),

    /// List registered sources
    Sources(super::SourcesCommand),

    /// Inspect stored checkpoints
    Checkpoint(super::CheckpointCommand),
}

/// Crawl command arguments
#[derive(Parser, Debug)]
pub struct CrawlArgs {
    /// Source identifiers (see `sources list`)
    #[arg(required = true)]
    pub sources: Vec<String>,

    /// Inclusive start (YYYY-MM-DD or RFC 3339)
    #[arg(long, default_value = "2015-01-01", value_parser = parse_date)]
    pub start: DateTime<Utc>,

    /// Exclusive end (YYYY-MM-DD or RFC 3339); defaults to today 00:00 UTC
    #[arg(long, value_parser = parse_date)]
    pub end: Option<DateTime<Utc>>,

    /// Config override as dotted.path=value (repeatable)
    #[arg(short = 'o', long = "override", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,

    /// Plan and print windows without fetching or writing
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,
}

/// Resolved config plus its provider
pub(crate) type LoadedSource = (SourceConfig, Arc<dyn Provider>);

/// Resolve a source's config file and overrides, then build its provider
pub(crate) fn load_source(
    registry: &ConfigRegistry,
    config_dir: &Path,
    source_id: &str,
    overrides: &[(String, String)],
) -> Result<LoadedSource, CliError> {
    let config = registry.resolve_file(config_dir, source_id, overrides)?;
    let provider = registry.create_provider(&config)?;
    Ok((config, provider))
}

/// Handle Reset mode: delete every checkpoint of the source
async fn handle_resume_reset(config: &SourceConfig, provider: &dyn Provider) -> Result<(), CliError> {
    let store = FileCheckpointStore::open(config.dst_dir_raw())?;
    for stream in stream_keys(provider) {
        let key = CheckpointKey::new(config.source_id(), stream.as_deref());
        info!(key = %key, "Reset mode: deleting checkpoint");
        store.reset(&key).await?;
    }
    Ok(())
}

/// Handle Verify mode: every checkpoint file of the source must load
pub(crate) fn handle_resume_verify(config: &SourceConfig) -> Result<usize, CliError> {
    let store = FileCheckpointStore::open(config.dst_dir_raw())?;
    let prefix = format!("{}__", config.source_id());
    let own = format!("{}.json", config.source_id());

    let mut valid_count = 0;
    let mut invalid = Vec::new();
    for health in verify_checkpoints(store.root())? {
        let name = health
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        if name != own && !name.starts_with(&prefix) {
            continue;
        }
        match &health.result {
            Ok(_) => valid_count += 1,
            Err(e) => {
                error!("Invalid checkpoint: {}: {}", health.path.display(), e);
                invalid.push(format!("{}: {e}", health.path.display()));
            }
        }
    }

    if !invalid.is_empty() {
        return Err(CliError::VerificationFailed(format!(
            "{} invalid checkpoint file(s) for '{}'. Use --resume reset to clear.\n{}",
            invalid.len(),
            config.source_id(),
            invalid.join("\n")
        )));
    }

    info!(
        source_id = config.source_id(),
        "Verify passed: {} valid checkpoint file(s)", valid_count
    );
    Ok(valid_count)
}

/// Combined exit code: any failure wins over cancellation
pub fn worst_exit_code(codes: &[i32]) -> i32 {
    codes
        .iter()
        .copied()
        .max_by_key(|code| match *code {
            0 => 0,
            EXIT_CANCELLED => 1,
            _ => 2,
        })
        .unwrap_or(0)
}

impl CrawlArgs {
    /// Requested `[start, end)`
    pub fn time_range(&self) -> Result<TimeRange, CliError> {
        let end = match self.end {
            Some(end) => end,
            None => Utc::now()
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .ok_or_else(|| CliError::InvalidArgument("cannot compute today".to_string()))?,
        };
        TimeRange::new(self.start, end).map_err(|e| CliError::InvalidArgument(e.to_string()))
    }

    /// Run the crawl and return the process exit code
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<i32, CliError> {
        let range = self.time_range()?;
        let overrides = parse_key_value_pairs(&self.overrides)?;
        let registry = ConfigRegistry::builtin();

        let mut source_ids: Vec<&str> = Vec::new();
        for id in &self.sources {
            if !source_ids.contains(&id.as_str()) {
                source_ids.push(id);
            }
        }

        // Resolve everything before touching the network
        let sources = source_ids
            .iter()
            .map(|id| load_source(&registry, &cli.config_dir, id, &overrides))
            .collect::<Result<Vec<_>, CliError>>()?;

        for (config, provider) in &sources {
            match cli.resume {
                ResumeMode::On => {}
                // A dry run plans as if reset but leaves the checkpoints on disk
                ResumeMode::Reset if self.dry_run => {}
                ResumeMode::Reset => handle_resume_reset(config, provider.as_ref()).await?,
                ResumeMode::Verify => {
                    handle_resume_verify(config)?;
                }
            }
        }

        if self.dry_run {
            let ignore_checkpoints = cli.resume == ResumeMode::Reset;
            return dry_run(sources, range, ignore_checkpoints, cli.output_format).await;
        }

        if let Some(addr) = cli.metrics_addr {
            init_metrics(addr)?;
        }

        info!(
            sources = sources.len(),
            range = %range,
            concurrency = cli.concurrency,
            "Starting crawl"
        );

        let multi = MultiProgress::new();
        let jobs = sources
            .into_iter()
            .map(|source| {
                let bar = multi.add(create_progress_bar(source.0.source_id())?);
                Ok((source, bar))
            })
            .collect::<Result<Vec<_>, CliError>>()?;

        let results: Vec<(String, Result<SourceReport, CrawlError>)> = stream::iter(jobs)
            .map(|((config, provider), bar)| {
                let shutdown = shutdown.clone();
                async move {
                    let source_id = config.source_id().to_string();
                    let progress = Arc::new(CrawlProgress::with_bar(bar));
                    let result = match CrawlEngine::open(config, provider) {
                        Ok(engine) => {
                            engine
                                .with_shutdown(shutdown)
                                .with_progress(progress.clone())
                                .run(range)
                                .await
                        }
                        Err(e) => Err(e),
                    };
                    progress.finish(match &result {
                        Ok(report) => report.status().to_string(),
                        Err(_) => "error".to_string(),
                    });
                    (source_id, result)
                }
            })
            .buffer_unordered(cli.concurrency)
            .collect()
            .await;

        let mut codes = Vec::with_capacity(results.len());
        for (source_id, result) in &results {
            match result {
                Ok(report) => {
                    codes.push(report.exit_code());
                    render_report(report, cli.output_format)?;
                    for (stream, failure) in report.failures() {
                        eprintln!("{} failed: {}", stream.target(), failure);
                    }
                }
                Err(e) => {
                    codes.push(1);
                    error!(source_id = %source_id, error = %e, "Crawl aborted");
                    eprintln!("{source_id} aborted: {e}");
                }
            }
        }

        Ok(worst_exit_code(&codes))
    }
}

/// Print the windows each stream would fetch
async fn dry_run(
    sources: Vec<LoadedSource>,
    range: TimeRange,
    ignore_checkpoints: bool,
    format: OutputFormat,
) -> Result<i32, CliError> {
    let mut plans = Vec::new();
    for (config, provider) in sources {
        let source_id = config.source_id().to_string();
        let engine = CrawlEngine::open(config, provider.clone())?;
        for stream in engine.stream_keys() {
            let windows = if ignore_checkpoints {
                engine.plan_without_checkpoint(&range)?
            } else {
                engine.plan(stream.as_deref(), &range).await?
            };
            info!(
                source_id = %source_id,
                stream = stream.as_deref().unwrap_or("-"),
                windows = windows.len(),
                "Dry run: planned windows"
            );
            match format {
                OutputFormat::Human => {
                    let target = match &stream {
                        Some(s) => format!("{source_id}/{s}"),
                        None => source_id.clone(),
                    };
                    println!("{target}: {} window(s)", windows.len());
                    for window in &windows {
                        println!(
                            "  {}",
                            provider.describe_request(stream.as_deref(), window)
                        );
                    }
                }
                OutputFormat::Json => plans.push(serde_json::json!({
                    "source_id": source_id,
                    "stream": stream,
                    "windows": windows,
                })),
            }
        }
    }

    if format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&plans)
            .map_err(|e| CliError::OutputError(e.to_string()))?;
        println!("{json}");
    }
    Ok(0)
}

fn render_report(report: &SourceReport, format: OutputFormat) -> Result<(), CliError> {
    match format {
        OutputFormat::Human => {
            for stream in &report.streams {
                println!("{}", stream.summary());
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string(report)
                .map_err(|e| CliError::OutputError(e.to_string()))?;
            println!("{json}");
        }
    }
    Ok(())
}

/// Progress bar for one source
fn create_progress_bar(source_id: &str) -> Result<ProgressBar, CliError> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {prefix} {msg}")
            .map_err(|e| CliError::OutputError(format!("invalid progress template: {e}")))?
            .progress_chars("#>-"),
    );
    pb.set_prefix(source_id.to_string());
    Ok(pb)
}
