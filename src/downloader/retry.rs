//! Retry decisions and retry log formatting
//!
//! [`RetryPolicy`] turns one failed attempt into either a delay before the
//! next attempt or a final give-up. Only [`FailureKind::Transient`] and
//! [`FailureKind::RateLimited`] are retried; everything else escalates on the
//! first occurrence. Backoff is `min(base * 2^(attempt-1) + jitter,
//! max_backoff)` with jitter drawn uniformly from `[0, base)`. A provider
//! `Retry-After` replaces the computed delay.

use crate::config::CrawlSettings;
use crate::fetcher::{AttemptFailure, FailureKind};
use crate::FetchWindow;
use rand::Rng;
use std::time::Duration;

/// What to do after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after the delay
    Retry {
        /// Delay before the next attempt
        after: Duration,
    },
    /// Stop retrying this window
    GiveUp {
        /// Why retrying stopped
        reason: String,
    },
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    max_backoff: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// Policy allowing `max_attempts` attempts in total (at least one)
    pub fn new(max_attempts: u32, base: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            max_backoff,
            jitter: true,
        }
    }

    /// Policy from a source's crawl settings
    pub fn from_settings(settings: &CrawlSettings) -> Self {
        Self::new(
            settings.max_attempts,
            settings.base_backoff,
            settings.max_backoff,
        )
    }

    /// Disable jitter (deterministic delays)
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Attempts allowed per window, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let exponential = self.base.saturating_mul(1u32 << exponent);

        let base_ms = self.base.as_millis() as u64;
        let jitter = if self.jitter && base_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..base_ms))
        } else {
            Duration::ZERO
        };

        exponential.saturating_add(jitter).min(self.max_backoff)
    }

    /// Decide what follows failed attempt number `attempt` (1-based)
    pub fn decide(&self, attempt: u32, failure: &AttemptFailure) -> RetryDecision {
        if !failure.kind.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("{} is not retryable: {}", failure.kind, failure.message),
            };
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!(
                    "gave up after {} attempts: {}",
                    self.max_attempts, failure
                ),
            };
        }
        let after = failure
            .retry_after
            .unwrap_or_else(|| self.backoff(attempt));
        RetryDecision::Retry { after }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_MAX_ATTEMPTS,
            Duration::from_millis(crate::config::DEFAULT_BASE_BACKOFF_MS),
            Duration::from_millis(crate::config::DEFAULT_MAX_BACKOFF_MS),
        )
    }
}

/// Context for retry and failure log messages
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Attempts allowed
    pub max_attempts: u32,
    /// Failure that triggered the message
    pub kind: FailureKind,
    /// Delay before the next attempt
    pub backoff: Duration,
    /// Source identifier
    pub source_id: String,
    /// Stream key
    pub stream: Option<String>,
    /// Window being fetched
    pub window: FetchWindow,
    /// Underlying error message
    pub error_message: String,
    /// Request description
    pub request: String,
}

impl RetryContext {
    /// Formatted retry line with attempt counters
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({}) {}",
            self.attempt + 1,
            self.max_attempts,
            self.kind.description(),
            self.backoff.as_secs_f64(),
            self.target(),
            self.window
        )
    }

    /// Multi-line failure summary with suggestions
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!(
                "[FAILED] {} failed after {} attempt(s)",
                self.target(),
                self.attempt
            ),
            format!("  Last error: {}", self.error_message),
            format!("  Window: {}", self.window),
            format!("  Request: {}", self.request),
            "  Suggestions:".to_string(),
        ];
        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }
        lines.join("\n")
    }

    /// Suggestions for the failure kind
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.kind.suggestion().to_string()];
        if self.kind.is_retryable() {
            suggestions.push(format!(
                "Try increasing crawl.max_attempts (current: {})",
                self.max_attempts
            ));
        }
        suggestions.push(
            "Re-run the same command to resume after the last committed window".to_string(),
        );
        suggestions
    }

    fn target(&self) -> String {
        match &self.stream {
            Some(stream) => format!("{}/{}", self.source_id, stream),
            None => self.source_id.clone(),
        }
    }
}
