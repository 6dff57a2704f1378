//! Crawl orchestration and rate limiting
//!
//! This module provides the coordination engine that turns a requested date
//! range into committed raw artifacts, one window at a time.
//!
//! # Overview
//!
//! A crawl of one source runs through these steps per stream:
//!
//! 1. **Planning**: subtract the checkpointed prefix and split the rest into
//!    windows with [`plan::plan_windows`]
//! 2. **Fetching**: gate every provider call on the source's
//!    [`rate_limit::RateLimiter`] and retry per [`retry::RetryPolicy`]
//! 3. **Validating**: hand the payload to the provider's shape check
//! 4. **Persisting**: stage the artifact, commit the checkpoint, publish
//! 5. **Advancing**: report progress and move to the next window
//!
//! # Quick Start
//!
//! ```no_run
//! use grid_data_downloader::downloader::CrawlEngine;
//! use grid_data_downloader::fetcher::demo::DemoProvider;
//! use grid_data_downloader::registry::ConfigRegistry;
//! use grid_data_downloader::TimeRange;
//! use chrono::{TimeZone, Utc};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigRegistry::builtin()
//!     .resolve_str("demo", "paths: {dst_dir_raw: ./data/raw/demo}", &[])?;
//! let engine = CrawlEngine::open(config, Arc::new(DemoProvider::new()))?;
//!
//! let range = TimeRange::new(
//!     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
//! )?;
//! let report = engine.run(range).await?;
//! for stream in &report.streams {
//!     println!("{}", stream.summary());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Components
//!
//! - [`engine`] - Per-window state machine and stream loop
//! - [`plan`] - Remaining range and window partitioning
//! - [`rate_limit`] - Request budget and in-flight ceiling
//! - [`retry`] - Backoff policy and retry log formatting
//! - [`progress`] - Committed-window counters and progress lines
//! - [`report`] - Crawl outcomes and exit codes
//!
//! # Error Handling
//!
//! Provider failures end a stream with [`CrawlStatus::Failed`] and are
//! described in its [`CrawlReport`]. Only infrastructure failures (config,
//! checkpoint or artifact I/O) surface as [`CrawlError`].
//!
//! # Related Modules
//!
//! - [`crate::fetcher`] - Provider calls and failure taxonomy
//! - [`crate::output`] - Artifact staging and publication
//! - [`crate::resume`] - Checkpoint persistence

pub mod engine;
pub mod plan;
pub mod progress;
pub mod rate_limit;
pub mod report;
pub mod retry;

pub use engine::{CrawlEngine, CrawlError};
pub use plan::{plan_windows, remaining_range};
pub use progress::{CrawlProgress, ProgressState};
pub use rate_limit::{RateLimitError, RateLimiter, ScopedPermit};
pub use report::{CrawlReport, CrawlStatus, SourceReport, WindowFailure, EXIT_CANCELLED};
pub use retry::{RetryContext, RetryDecision, RetryPolicy};
