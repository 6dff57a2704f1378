//! Progress tracking for long-running crawls.
//!
//! Counts committed windows against the planned total, estimates the time
//! remaining, and decides when a `[PROGRESS]` log line is due. An optional
//! `indicatif` bar mirrors the same counters for interactive runs.

use crate::FetchWindow;
use indicatif::ProgressBar;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);
const MIN_CRAWL_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_PERCENTAGE_STEP: f64 = 10.0;

/// Progress counters for planned windows.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Windows committed so far.
    pub windows_committed: u64,
    /// Windows planned so far.
    pub total_windows: u64,
    /// When tracking started.
    pub start_time: Instant,
    /// Last time progress was reported.
    pub last_update: Instant,
    /// Minimum interval between time-based updates.
    pub update_interval: Duration,
    /// Commit rate in windows per second.
    pub current_rate: f64,
    /// Last committed window, for display.
    pub current_window: Option<String>,
    /// Percentage at the last emitted update.
    pub last_reported_percentage: f64,
    /// Percentage delta that forces an update.
    pub min_percentage_step: f64,
}

impl ProgressState {
    /// Fresh state with default cadence.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            windows_committed: 0,
            total_windows: 0,
            start_time: now,
            last_update: now,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            current_rate: 0.0,
            current_window: None,
            last_reported_percentage: 0.0,
            min_percentage_step: DEFAULT_PERCENTAGE_STEP,
        }
    }

    /// Count one committed window.
    pub fn update(&mut self, window: &FetchWindow) {
        self.windows_committed = self.windows_committed.saturating_add(1);
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.current_rate = self.windows_committed as f64 / elapsed;
        }
        self.current_window = Some(window.to_string());
    }

    /// Completion percentage (0-100).
    pub fn percentage(&self) -> Option<f64> {
        if self.total_windows == 0 {
            return None;
        }
        Some((self.windows_committed as f64 / self.total_windows as f64) * 100.0)
    }

    /// Whether an update is due by percentage step or elapsed time.
    pub fn should_emit_update(&self) -> bool {
        if self.windows_committed == 0 {
            return false;
        }

        let percentage_jump = self
            .percentage()
            .map(|pct| pct - self.last_reported_percentage >= self.min_percentage_step)
            .unwrap_or(false);
        if percentage_jump {
            return true;
        }

        self.start_time.elapsed() >= MIN_CRAWL_DURATION
            && self.last_update.elapsed() >= self.update_interval
    }

    /// Reset timers after an update was emitted.
    pub fn mark_emitted(&mut self) {
        self.last_update = Instant::now();
        if let Some(pct) = self.percentage() {
            self.last_reported_percentage = pct;
        }
    }

    /// Estimated time until every planned window is committed.
    pub fn estimate_remaining(&self) -> Option<Duration> {
        if self.current_rate <= 0.0 {
            return None;
        }
        let remaining = self.total_windows.saturating_sub(self.windows_committed);
        if remaining == 0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / self.current_rate))
    }

    /// Human-readable progress line.
    pub fn format_progress(&self) -> String {
        let mut parts = vec![format!(
            "[PROGRESS] Committed {}/{} windows",
            self.windows_committed, self.total_windows
        )];

        if let Some(pct) = self.percentage() {
            parts.push(format!("- {pct:.1}% complete"));
        }
        if let Some(window) = &self.current_window {
            parts.push(format!("(last {window})"));
        }
        if let Some(remaining) = self.estimate_remaining() {
            parts.push(format!("- ~{} remaining", format_duration(remaining)));
        }

        parts.join(" ")
    }
}

impl Default for ProgressState {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress shared by all streams of one crawl
#[derive(Default)]
pub struct CrawlProgress {
    bar: Option<ProgressBar>,
    state: Mutex<ProgressState>,
}

impl std::fmt::Debug for CrawlProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlProgress")
            .field("bar", &self.bar.is_some())
            .field("state", &self.state)
            .finish()
    }
}

impl CrawlProgress {
    /// Log-only progress
    pub fn new() -> Self {
        Self::default()
    }

    /// Progress mirrored on a terminal bar
    pub fn with_bar(bar: ProgressBar) -> Self {
        Self {
            bar: Some(bar),
            state: Mutex::new(ProgressState::new()),
        }
    }

    /// Add newly planned windows to the total
    pub fn add_planned(&self, windows: u64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.total_windows = state.total_windows.saturating_add(windows);
        if let Some(bar) = &self.bar {
            bar.set_length(state.total_windows);
        }
    }

    /// Count a committed window; returns a progress line when one is due
    pub fn window_committed(&self, window: &FetchWindow) -> Option<String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.update(window);
        if let Some(bar) = &self.bar {
            bar.set_position(state.windows_committed);
            bar.set_message(window.to_string());
        }
        if state.should_emit_update() {
            state.mark_emitted();
            return Some(state.format_progress());
        }
        None
    }

    /// Snapshot of the counters
    pub fn snapshot(&self) -> ProgressState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Finish the bar with a final message
    pub fn finish(&self, message: String) {
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message);
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else {
        format!("{:.1}h", secs as f64 / 3600.0)
    }
}
