//! # Grid Data Downloader Library
//!
//! A resumable backfill crawler for energy-market and weather time-series
//! providers. Every provider is driven by the same coordination engine, so
//! downstream dataset builders can treat all raw sources identically.
//!
//! ## Features
//!
//! - **Config-driven sources**: one YAML document per source, resolved through a
//!   static [`registry::ConfigRegistry`] with `-o dotted.path=value` overrides
//! - **Resumable crawls**: per-stream checkpoints advance monotonically after every
//!   durably persisted window
//! - **Rate limiting**: per-source request budget and in-flight ceiling
//! - **Bounded retries**: failures are classified and retried with capped, jittered
//!   exponential backoff
//! - **Atomic artifacts**: raw payloads become visible only after their window is
//!   committed
//!
//! ## Quick Start
//!
//! ```no_run
//! use grid_data_downloader::downloader::CrawlEngine;
//! use grid_data_downloader::registry::ConfigRegistry;
//! use grid_data_downloader::TimeRange;
//! use chrono::{TimeZone, Utc};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ConfigRegistry::builtin();
//! let config = registry.resolve_file("configs".as_ref(), "demo", &[])?;
//! let provider = registry.create_provider(&config)?;
//!
//! let range = TimeRange::new(
//!     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap(),
//! )?;
//!
//! let engine = CrawlEngine::open(config, provider)?;
//! let report = engine.run(range).await?;
//! std::process::exit(report.exit_code());
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`config`] - Typed source configuration, field schema and overrides
//! - [`registry`] - Source identifier to config schema and provider factory
//! - [`fetcher`] - Provider trait, failure taxonomy and shipped providers
//! - [`downloader`] - Window planning, rate limiting, retry policy and the crawl engine
//! - [`resume`] - Durable per-stream checkpoints
//! - [`output`] - Raw artifact staging and publication
//! - [`shutdown`] - Cooperative cancellation
//! - [`metrics`] - Prometheus counters and histograms

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Datelike, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

pub mod cli;

pub mod config;

pub mod downloader;

pub mod fetcher;

pub mod metrics;

pub mod output;

pub mod registry;

pub mod resume;

pub mod shutdown;

// Re-export commonly used types
pub use config::{ConfigError, SourceConfig};
pub use registry::ConfigRegistry;

/// Timestamp format used in artifact names and log lines
pub const WINDOW_STAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Calendar granularity used to split a requested range into fetch windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One window per UTC hour
    Hourly,
    /// One window per UTC day
    Daily,
    /// One window per calendar month
    Monthly,
    /// One window per calendar year
    Yearly,
}

impl Granularity {
    /// First boundary strictly after `t`.
    ///
    /// Returns `None` only when the boundary is outside chrono's representable range.
    pub fn next_boundary(&self, t: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Granularity::Hourly => {
                let secs = t.timestamp();
                let floor = secs - secs.rem_euclid(3600);
                DateTime::from_timestamp(floor.checked_add(3600)?, 0)
            }
            Granularity::Daily => {
                let next = t.date_naive().succ_opt()?;
                Some(next.and_hms_opt(0, 0, 0)?.and_utc())
            }
            Granularity::Monthly => {
                let (year, month) = if t.month() == 12 {
                    (t.year().checked_add(1)?, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                Some(NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?.and_utc())
            }
            Granularity::Yearly => {
                let year = t.year().checked_add(1)?;
                Some(NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?.and_utc())
            }
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Monthly => "monthly",
            Granularity::Yearly => "yearly",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hourly" | "1h" => Ok(Granularity::Hourly),
            "daily" | "1d" => Ok(Granularity::Daily),
            "monthly" | "1mo" => Ok(Granularity::Monthly),
            "yearly" | "1y" => Ok(Granularity::Yearly),
            _ => Err(format!(
                "Invalid granularity: {s}. Valid options: hourly, daily, monthly, yearly"
            )),
        }
    }
}

/// Parse `YYYY-MM-DD` (midnight UTC) or an RFC 3339 timestamp
///
/// RFC 3339 input without an offset is read as UTC. Fractional seconds are
/// dropped: window stamps have one-second resolution.
pub fn parse_utc_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc).trunc_subsecs(0));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Some(dt.with_timezone(&Utc).trunc_subsecs(0));
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}

/// Requested range was empty (`end <= start`)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("empty time range: {start} is not before {end}")]
pub struct EmptyRangeError {
    /// Range start
    pub start: DateTime<Utc>,
    /// Range end (exclusive)
    pub end: DateTime<Utc>,
}

/// Half-open `[start, end)` interval in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a range; fails if `end <= start`
    ///
    /// Both bounds are truncated to whole seconds first, so every planned
    /// window round-trips through [`WINDOW_STAMP_FORMAT`].
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EmptyRangeError> {
        let (start, end) = (start.trunc_subsecs(0), end.trunc_subsecs(0));
        if end <= start {
            return Err(EmptyRangeError { start, end });
        }
        Ok(Self { start, end })
    }

    /// Inclusive start
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Unit of fetch work, retry and checkpointing
///
/// Covers `[start, end)`. Providers that page through results may carry an
/// opaque `cursor` that is persisted with the checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
    /// Provider page token, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl FetchWindow {
    /// Create a window without a cursor
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            cursor: None,
        }
    }

    /// Deterministic `START_END` stem used for artifact names
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}",
            self.start.format(WINDOW_STAMP_FORMAT),
            self.end.format(WINDOW_STAMP_FORMAT)
        )
    }
}

impl std::fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}
