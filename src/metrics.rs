//! Crawl observability metrics
//!
//! Counters and histograms for window attempts, retries, commits and crawl
//! failures, exported through Prometheus when `--metrics-addr` is given.
//!
//! ## Architecture
//!
//! - Uses the `metrics` facade, so every call is a cheap no-op until a
//!   recorder is installed
//! - [`init_metrics`] installs the Prometheus exporter with its own HTTP
//!   scrape listener
//! - Labels carry the source identifier and, where relevant, the failure kind

use crate::fetcher::FailureKind;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Set once the exporter is installed
static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

/// Metrics initialization errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed
    #[error("failed to install Prometheus exporter on {addr}: {reason}")]
    InstallFailed {
        /// Requested listen address
        addr: SocketAddr,
        /// Exporter error
        reason: String,
    },
}

/// Install the Prometheus exporter and describe all metrics
///
/// Idempotent: later calls are ignored once an exporter is running.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(addr = %existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::InstallFailed {
            addr,
            reason: e.to_string(),
        })?;

    describe_counter!(
        "window_attempts_total",
        Unit::Count,
        "Provider calls made, labelled by outcome"
    );
    describe_counter!(
        "window_retries_total",
        Unit::Count,
        "Retries scheduled after a retryable failure"
    );
    describe_counter!(
        "windows_committed_total",
        Unit::Count,
        "Windows whose checkpoint commit succeeded"
    );
    describe_counter!(
        "crawl_failures_total",
        Unit::Count,
        "Crawls that ended in the Failed state"
    );
    describe_histogram!(
        "fetch_duration_seconds",
        Unit::Seconds,
        "Duration of one provider call"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff slept before a retry"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate limit permit"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    info!(addr = %addr, "Metrics exporter listening");
    Ok(())
}

/// Times one provider call
pub struct FetchMetrics {
    source_id: String,
    attempt: u32,
    start_time: Instant,
}

impl FetchMetrics {
    /// Start timing an attempt
    pub fn start(source_id: &str, attempt: u32) -> Self {
        Self {
            source_id: source_id.to_string(),
            attempt,
            start_time: Instant::now(),
        }
    }

    /// Record the attempt's outcome; `None` means success
    pub fn record(&self, failure: Option<FailureKind>) {
        let duration = self.start_time.elapsed();
        let outcome = failure.map_or_else(|| "ok".to_string(), |kind| kind.to_string());

        counter!(
            "window_attempts_total",
            "source" => self.source_id.clone(),
            "outcome" => outcome.clone(),
        )
        .increment(1);
        histogram!(
            "fetch_duration_seconds",
            "source" => self.source_id.clone(),
        )
        .record(duration.as_secs_f64());

        debug!(
            source_id = %self.source_id,
            attempt = self.attempt,
            outcome = %outcome,
            duration_ms = duration.as_millis() as u64,
            "Provider call finished"
        );
    }
}

/// Record a scheduled retry
pub fn record_retry_backoff(source_id: &str, duration: Duration, attempt: u32) {
    counter!("window_retries_total", "source" => source_id.to_string()).increment(1);
    histogram!("retry_backoff_duration_seconds", "source" => source_id.to_string())
        .record(duration.as_secs_f64());
    debug!(
        source_id,
        attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Record time spent queued behind the rate limiter
pub fn record_rate_limit_wait(source_id: &str, waited: Duration) {
    histogram!("rate_limit_wait_seconds", "source" => source_id.to_string())
        .record(waited.as_secs_f64());
}

/// Record a committed window
pub fn record_window_committed(source_id: &str) {
    counter!("windows_committed_total", "source" => source_id.to_string()).increment(1);
}

/// Record a crawl that ended in failure
pub fn record_crawl_failure(source_id: &str, kind: FailureKind) {
    counter!(
        "crawl_failures_total",
        "source" => source_id.to_string(),
        "kind" => kind.to_string(),
    )
    .increment(1);
}
