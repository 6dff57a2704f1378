//! Crawl coordination engine
//!
//! Drives every planned window of a stream through
//! `Planning -> Fetching -> Validating -> Persisting -> Advancing` until all
//! windows are committed (`Completed`) or one window fails for good
//! (`Failed`). Commits always extend the contiguous committed prefix: when
//! windows are fetched ahead, results are consumed in plan order and the
//! loop stops at the first failed window.
//!
//! Persisting a window stages the artifact durably, commits the checkpoint,
//! then publishes the artifact. Staged leftovers of an interrupted run are
//! reconciled against the checkpoint before planning.

use super::plan::{plan_windows, remaining_range};
use super::progress::CrawlProgress;
use super::rate_limit::RateLimiter;
use super::report::{CrawlReport, CrawlStatus, SourceReport, WindowFailure};
use super::retry::{RetryContext, RetryDecision, RetryPolicy};
use crate::config::{ConfigError, SourceConfig};
use crate::fetcher::{stream_keys, AttemptFailure, FailureKind, FetchedPayload, Provider};
use crate::metrics::{self, FetchMetrics};
use crate::output::{ArtifactError, ArtifactStore, RawArtifact};
use crate::resume::{
    CheckpointError, CheckpointKey, CheckpointStore, CrawlCheckpoint, FileCheckpointStore,
};
use crate::shutdown::{self, SharedShutdown};
use crate::{FetchWindow, TimeRange};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Infrastructure failures that abort a crawl outright
///
/// Provider failures are not errors here: they end a stream with
/// [`CrawlStatus::Failed`] inside the report.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// Config or provider binding problem
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Checkpoint could not be read or written
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Artifact could not be staged or published
    #[error("artifact error: {0}")]
    Artifact(#[from] ArtifactError),
}

/// Payload that passed validation, waiting to be persisted
struct FetchedWindow {
    window: FetchWindow,
    payload: FetchedPayload,
    request: String,
    attempts: u32,
    fetched_at: DateTime<Utc>,
}

/// Coordinates the crawl of one source
pub struct CrawlEngine {
    config: SourceConfig,
    provider: Arc<dyn Provider>,
    checkpoints: Arc<dyn CheckpointStore>,
    artifacts: ArtifactStore,
    rate_limiter: RateLimiter,
    retry_policy: RetryPolicy,
    shutdown: Option<SharedShutdown>,
    progress: Option<Arc<CrawlProgress>>,
}

impl std::fmt::Debug for CrawlEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlEngine")
            .field("source_id", &self.config.source_id())
            .field("artifacts", &self.artifacts)
            .field("rate_limiter", &self.rate_limiter)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl CrawlEngine {
    /// Engine with file-backed checkpoints and artifacts under `dst_dir_raw`
    pub fn open(config: SourceConfig, provider: Arc<dyn Provider>) -> Result<Self, CrawlError> {
        let checkpoints = Arc::new(FileCheckpointStore::open(config.dst_dir_raw())?);
        let artifacts = ArtifactStore::open(config.dst_dir_raw(), config.source_id())?;
        Ok(Self::new(config, provider, checkpoints, artifacts))
    }

    /// Engine with injected stores
    ///
    /// The rate limiter and retry policy are built from the config.
    pub fn new(
        config: SourceConfig,
        provider: Arc<dyn Provider>,
        checkpoints: Arc<dyn CheckpointStore>,
        artifacts: ArtifactStore,
    ) -> Self {
        let rate_limiter = RateLimiter::new(*config.rate_limit());
        let retry_policy = RetryPolicy::from_settings(config.crawl());
        Self {
            config,
            provider,
            checkpoints,
            artifacts,
            rate_limiter,
            retry_policy,
            shutdown: None,
            progress: None,
        }
    }

    /// Stop cleanly when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.rate_limiter = self.rate_limiter.with_shutdown(shutdown.clone());
        self.shutdown = Some(shutdown);
        self
    }

    /// Replace the config-derived rate limiter
    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = match &self.shutdown {
            Some(shutdown) => rate_limiter.with_shutdown(shutdown.clone()),
            None => rate_limiter,
        };
        self
    }

    /// Replace the config-derived retry policy
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Report committed windows to a progress tracker
    pub fn with_progress(mut self, progress: Arc<CrawlProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Source config
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    /// Stream keys to crawl; `[None]` for single-stream sources
    pub fn stream_keys(&self) -> Vec<Option<String>> {
        stream_keys(self.provider.as_ref())
    }

    /// Windows a crawl of `stream` would fetch, without side effects
    pub async fn plan(
        &self,
        stream: Option<&str>,
        requested: &TimeRange,
    ) -> Result<Vec<FetchWindow>, CrawlError> {
        self.check_provider()?;
        let key = self.key(stream);
        let checkpoint = self.checkpoints.load(&key).await?;
        Ok(self.plan_from(requested, checkpoint.as_ref()))
    }

    /// Windows a crawl would fetch after a checkpoint reset
    pub fn plan_without_checkpoint(
        &self,
        requested: &TimeRange,
    ) -> Result<Vec<FetchWindow>, CrawlError> {
        self.check_provider()?;
        Ok(self.plan_from(requested, None))
    }

    /// Crawl every stream of the source in order
    ///
    /// A failed stream does not stop later streams; cancellation does.
    pub async fn run(&self, requested: TimeRange) -> Result<SourceReport, CrawlError> {
        self.check_provider()?;
        let mut report = SourceReport {
            source_id: self.config.source_id().to_string(),
            streams: Vec::new(),
        };

        for stream in self.stream_keys() {
            let stream_report = self.run_stream(stream.as_deref(), &requested).await?;
            let cancelled = stream_report.status == CrawlStatus::Cancelled;
            report.streams.push(stream_report);
            if cancelled {
                break;
            }
        }

        info!(
            source_id = %report.source_id,
            status = %report.status(),
            committed = report.committed_windows(),
            "Source crawl finished"
        );
        Ok(report)
    }

    /// Crawl one stream
    pub async fn run_stream(
        &self,
        stream: Option<&str>,
        requested: &TimeRange,
    ) -> Result<CrawlReport, CrawlError> {
        let span = info_span!(
            "crawl",
            source_id = %self.config.source_id(),
            stream = stream.unwrap_or("-"),
        );
        self.crawl(stream, requested).instrument(span).await
    }

    async fn crawl(
        &self,
        stream: Option<&str>,
        requested: &TimeRange,
    ) -> Result<CrawlReport, CrawlError> {
        let key = self.key(stream);
        let mut report = CrawlReport {
            source_id: self.config.source_id().to_string(),
            stream: stream.map(str::to_string),
            status: CrawlStatus::Completed,
            planned: 0,
            committed: Vec::new(),
            failure: None,
            checkpoint: None,
        };

        if self.is_shutdown_requested() {
            report.status = CrawlStatus::Cancelled;
            return Ok(report);
        }

        // Planning
        let checkpoint = self.checkpoints.load(&key).await?;
        let checkpoint_end = checkpoint.as_ref().map(CrawlCheckpoint::last_completed_end);
        let recovery = self.artifacts.recover(stream, checkpoint_end)?;
        if !recovery.published.is_empty() || !recovery.discarded.is_empty() {
            info!(
                published = recovery.published.len(),
                discarded = recovery.discarded.len(),
                "Reconciled staged artifacts from an interrupted run"
            );
        }

        let windows = self.plan_from(requested, checkpoint.as_ref());
        report.checkpoint = checkpoint;
        if windows.is_empty() {
            info!(
                requested = %requested,
                checkpoint_end = ?checkpoint_end,
                "Requested range already committed; nothing to fetch"
            );
            report.status = CrawlStatus::NoOp;
            return Ok(report);
        }

        report.planned = windows.len();
        if let Some(progress) = &self.progress {
            progress.add_planned(windows.len() as u64);
        }
        info!(
            windows = windows.len(),
            first = %windows[0],
            granularity = %self.config.crawl().granularity,
            "Planned crawl"
        );

        // Fetching and Validating, possibly ahead of the committed prefix
        let parallel = self.config.crawl().parallel_windows.max(1);
        let mut fetches = std::pin::pin!(futures::stream::iter(windows)
            .map(|window| self.fetch_window(stream, window))
            .buffered(parallel));

        while let Some(result) = fetches.next().await {
            let fetched = match result {
                Ok(fetched) => fetched,
                Err(failure) => {
                    report.status = if failure.kind == FailureKind::Cancelled {
                        CrawlStatus::Cancelled
                    } else {
                        CrawlStatus::Failed
                    };
                    report.failure = Some(failure);
                    break;
                }
            };

            if self.is_shutdown_requested() {
                debug!(window = %fetched.window, "Shutdown requested; dropping fetched window");
                report.status = CrawlStatus::Cancelled;
                report.failure = Some(WindowFailure {
                    window: fetched.window,
                    kind: FailureKind::Cancelled,
                    attempts: fetched.attempts,
                    message: "shutdown requested before persisting".to_string(),
                });
                break;
            }

            // Persisting, then Advancing
            let window = fetched.window.clone();
            let checkpoint = self.persist(&key, fetched).await?;
            metrics::record_window_committed(self.config.source_id());
            if let Some(progress) = &self.progress {
                if let Some(line) = progress.window_committed(&window) {
                    info!("{}", line);
                }
            }
            report.checkpoint = Some(checkpoint);
            report.committed.push(window);
        }

        match report.status {
            CrawlStatus::Failed => {
                if let Some(failure) = &report.failure {
                    metrics::record_crawl_failure(self.config.source_id(), failure.kind);
                    let context = RetryContext {
                        attempt: failure.attempts,
                        max_attempts: self.retry_policy.max_attempts(),
                        kind: failure.kind,
                        backoff: std::time::Duration::ZERO,
                        source_id: self.config.source_id().to_string(),
                        stream: stream.map(str::to_string),
                        window: failure.window.clone(),
                        error_message: failure.message.clone(),
                        request: self.provider.describe_request(stream, &failure.window),
                    };
                    error!("{}", context.format_failure());
                }
            }
            CrawlStatus::Cancelled => {
                info!(
                    committed = report.committed.len(),
                    "Crawl cancelled; checkpoint left at last committed window"
                );
            }
            CrawlStatus::Completed | CrawlStatus::NoOp => {
                info!(committed = report.committed.len(), "Crawl completed");
            }
        }

        Ok(report)
    }

    /// Stage, commit, publish
    async fn persist(
        &self,
        key: &CheckpointKey,
        fetched: FetchedWindow,
    ) -> Result<CrawlCheckpoint, CrawlError> {
        let artifact = RawArtifact {
            stream: key.stream().map(str::to_string),
            window: fetched.window,
            extension: self.provider.artifact_extension().to_string(),
            payload: fetched.payload,
            request: fetched.request,
            fetched_at: fetched.fetched_at,
        };

        let staged = self.artifacts.stage(&artifact)?;
        let checkpoint = match self.checkpoints.commit(key, &artifact.window).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                staged.discard();
                return Err(e.into());
            }
        };
        let path = staged.publish()?;

        debug!(
            window = %artifact.window,
            artifact = %path.display(),
            checkpoint_end = %checkpoint.last_completed_end(),
            "Window committed"
        );
        Ok(checkpoint)
    }

    /// Fetch and validate one window, retrying per policy
    async fn fetch_window(
        &self,
        stream: Option<&str>,
        window: FetchWindow,
    ) -> Result<FetchedWindow, WindowFailure> {
        let source_id = self.config.source_id();
        let request = self.provider.describe_request(stream, &window);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let failure = match self.attempt(stream, &window, attempt).await {
                Ok(payload) => {
                    return Ok(FetchedWindow {
                        window,
                        payload,
                        request,
                        attempts: attempt,
                        fetched_at: Utc::now(),
                    })
                }
                Err(failure) => failure,
            };

            match self.retry_policy.decide(attempt, &failure) {
                RetryDecision::Retry { after } => {
                    let context = RetryContext {
                        attempt,
                        max_attempts: self.retry_policy.max_attempts(),
                        kind: failure.kind,
                        backoff: after,
                        source_id: source_id.to_string(),
                        stream: stream.map(str::to_string),
                        window: window.clone(),
                        error_message: failure.message.clone(),
                        request: request.clone(),
                    };
                    warn!(
                        attempt,
                        kind = %failure.kind,
                        backoff_ms = after.as_millis() as u64,
                        error = %failure.message,
                        "{}",
                        context.format_retry()
                    );
                    metrics::record_retry_backoff(source_id, after, attempt);

                    tokio::select! {
                        biased;
                        _ = shutdown::wait_for(self.shutdown.as_ref()) => {
                            return Err(WindowFailure {
                                window,
                                kind: FailureKind::Cancelled,
                                attempts: attempt,
                                message: "shutdown requested during retry backoff".to_string(),
                            });
                        }
                        _ = sleep(after) => {}
                    }
                }
                RetryDecision::GiveUp { reason } => {
                    if failure.kind != FailureKind::Cancelled {
                        debug!(attempt, window = %window, reason = %reason, "Giving up on window");
                    }
                    return Err(WindowFailure {
                        window,
                        kind: failure.kind,
                        attempts: attempt,
                        message: failure.message,
                    });
                }
            }
        }
    }

    /// One rate-limited provider call plus validation
    async fn attempt(
        &self,
        stream: Option<&str>,
        window: &FetchWindow,
        attempt: u32,
    ) -> Result<FetchedPayload, AttemptFailure> {
        let source_id = self.config.source_id();

        let permit = self
            .rate_limiter
            .acquire()
            .await
            .map_err(|_| AttemptFailure::cancelled())?;
        metrics::record_rate_limit_wait(source_id, permit.waited());

        let timer = FetchMetrics::start(source_id, attempt);
        let outcome = tokio::select! {
            biased;
            _ = shutdown::wait_for(self.shutdown.as_ref()) => Err(AttemptFailure::cancelled()),
            outcome = self.provider.fetch(stream, window) => outcome,
        };
        drop(permit);

        let outcome = outcome.and_then(|payload| {
            self.provider
                .validate(stream, window, &payload)
                .map_err(AttemptFailure::validation)?;
            Ok(payload)
        });
        timer.record(outcome.as_ref().err().map(|f| f.kind));
        outcome
    }

    fn plan_from(
        &self,
        requested: &TimeRange,
        checkpoint: Option<&CrawlCheckpoint>,
    ) -> Vec<FetchWindow> {
        let checkpoint_end = checkpoint.map(CrawlCheckpoint::last_completed_end);
        let remaining = match remaining_range(requested, checkpoint_end) {
            Ok(remaining) => remaining,
            Err(e) => {
                debug!(error = %e, "No remaining range");
                return Vec::new();
            }
        };

        let mut windows = plan_windows(&remaining, self.config.crawl().granularity);
        // Resume a paged provider where the last commit left off
        if let (Some(first), Some(checkpoint)) = (windows.first_mut(), checkpoint) {
            if first.start == checkpoint.last_completed_end() {
                first.cursor = checkpoint.last_cursor().map(str::to_string);
            }
        }
        windows
    }

    fn check_provider(&self) -> Result<(), CrawlError> {
        if self.provider.source_id() != self.config.source_id() {
            return Err(ConfigError::ProviderError(format!(
                "provider '{}' cannot crawl source '{}'",
                self.provider.source_id(),
                self.config.source_id()
            ))
            .into());
        }
        Ok(())
    }

    fn key(&self, stream: Option<&str>) -> CheckpointKey {
        CheckpointKey::new(self.config.source_id(), stream)
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
    }
}
