//! Crawl outcomes

use crate::fetcher::FailureKind;
use crate::resume::CrawlCheckpoint;
use crate::FetchWindow;
use serde::Serialize;
use std::fmt;

/// Exit code for a clean stop after Ctrl+C
pub const EXIT_CANCELLED: i32 = 130;

/// Terminal state of one stream's crawl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    /// Every planned window committed
    Completed,
    /// Nothing left to fetch
    NoOp,
    /// A window failed permanently; earlier commits are kept
    Failed,
    /// Stopped by shutdown; earlier commits are kept
    Cancelled,
}

impl CrawlStatus {
    /// Process exit code for this state
    pub fn exit_code(&self) -> i32 {
        match self {
            CrawlStatus::Completed | CrawlStatus::NoOp => 0,
            CrawlStatus::Failed => 1,
            CrawlStatus::Cancelled => EXIT_CANCELLED,
        }
    }
}

impl fmt::Display for CrawlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrawlStatus::Completed => "completed",
            CrawlStatus::NoOp => "no-op",
            CrawlStatus::Failed => "failed",
            CrawlStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Window that ended a crawl
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowFailure {
    /// Failed window
    pub window: FetchWindow,
    /// Final failure classification
    pub kind: FailureKind,
    /// Attempts made for this window
    pub attempts: u32,
    /// Underlying cause
    pub message: String,
}

impl fmt::Display for WindowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "window {} failed with {} after {} attempt(s): {}",
            self.window, self.kind, self.attempts, self.message
        )
    }
}

/// Outcome of one stream
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    /// Source identifier
    pub source_id: String,
    /// Stream key
    pub stream: Option<String>,
    /// Terminal state
    pub status: CrawlStatus,
    /// Windows planned for this run
    pub planned: usize,
    /// Windows committed by this run, in order
    pub committed: Vec<FetchWindow>,
    /// Why the crawl stopped, for `Failed`
    pub failure: Option<WindowFailure>,
    /// Checkpoint after the run
    #[serde(skip)]
    pub checkpoint: Option<CrawlCheckpoint>,
}

impl CrawlReport {
    /// `source` or `source/stream`
    pub fn target(&self) -> String {
        match &self.stream {
            Some(stream) => format!("{}/{}", self.source_id, stream),
            None => self.source_id.clone(),
        }
    }

    /// One-line summary
    pub fn summary(&self) -> String {
        let mut line = format!(
            "{}: {} ({}/{} windows committed",
            self.target(),
            self.status,
            self.committed.len(),
            self.planned
        );
        if let Some(checkpoint) = &self.checkpoint {
            line.push_str(&format!(
                ", checkpoint {}",
                checkpoint.last_completed_end().format("%Y-%m-%dT%H:%M:%SZ")
            ));
        }
        line.push(')');
        if let Some(failure) = &self.failure {
            line.push_str(&format!(": {failure}"));
        }
        line
    }
}

/// Outcomes of every stream of one source
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    /// Source identifier
    pub source_id: String,
    /// Per-stream outcomes in run order
    pub streams: Vec<CrawlReport>,
}

impl SourceReport {
    /// Overall state: any failure wins, then cancellation, then completion
    pub fn status(&self) -> CrawlStatus {
        let has = |status: CrawlStatus| self.streams.iter().any(|r| r.status == status);
        if has(CrawlStatus::Failed) {
            CrawlStatus::Failed
        } else if has(CrawlStatus::Cancelled) {
            CrawlStatus::Cancelled
        } else if has(CrawlStatus::Completed) {
            CrawlStatus::Completed
        } else {
            CrawlStatus::NoOp
        }
    }

    /// Process exit code for the overall state
    pub fn exit_code(&self) -> i32 {
        self.status().exit_code()
    }

    /// Failures of all streams
    pub fn failures(&self) -> impl Iterator<Item = (&CrawlReport, &WindowFailure)> {
        self.streams
            .iter()
            .filter_map(|r| r.failure.as_ref().map(|f| (r, f)))
    }

    /// Windows committed across streams
    pub fn committed_windows(&self) -> usize {
        self.streams.iter().map(|r| r.committed.len()).sum()
    }
}
