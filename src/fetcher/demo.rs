//! Offline synthetic provider
//!
//! Produces one small JSON document of hourly points per window. Selected
//! windows can be configured to return a malformed document or to fail a
//! number of times before succeeding, which makes the crawl state machine
//! observable without network access.

use super::failure::{AttemptFailure, AttemptOutcome, FailureKind, FetchedPayload};
use super::Provider;
use crate::config::{
    narrow, ConfigError, FieldKind, FieldSpec, RateLimitSettings, SourceConfig, SourceDefaults,
};
use crate::{parse_utc_timestamp, FetchWindow, Granularity};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Source identifier
pub const SOURCE_ID: &str = "demo";

/// Provider-specific fields
pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::optional("demo.streams", FieldKind::StringList),
    FieldSpec::optional("demo.invalid_windows", FieldKind::StringList),
    FieldSpec::optional("demo.transient_failures", FieldKind::Integer),
    FieldSpec::optional("demo.latency_ms", FieldKind::Integer),
];

/// Registration defaults
pub const DEFAULTS: SourceDefaults = SourceDefaults {
    granularity: Granularity::Daily,
    rate_limit: RateLimitSettings::new(100, Duration::from_secs(1), 4),
};

/// Document written for every window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoDocument {
    /// Source identifier
    pub source_id: String,
    /// Stream key, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// Window start
    pub start: DateTime<Utc>,
    /// Window end
    pub end: DateTime<Utc>,
    /// Hourly samples
    pub points: Vec<DemoPoint>,
}

/// One synthetic sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemoPoint {
    /// Sample timestamp
    pub ts: DateTime<Utc>,
    /// Sample value
    pub value: f64,
}

/// Synthetic provider
pub struct DemoProvider {
    streams: Vec<String>,
    invalid_windows: HashSet<DateTime<Utc>>,
    transient_failures: u32,
    latency: Duration,
    attempts: Mutex<HashMap<(Option<String>, DateTime<Utc>), u32>>,
}

impl DemoProvider {
    /// Provider with no injected failures
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
            invalid_windows: HashSet::new(),
            transient_failures: 0,
            latency: Duration::ZERO,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Build from a resolved config
    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        let mut invalid_windows = HashSet::new();
        for raw in config.extra_string_list("demo.invalid_windows")? {
            let ts = parse_utc_timestamp(&raw).ok_or_else(|| ConfigError::TypeCoercion {
                path: "demo.invalid_windows".to_string(),
                expected: "date",
                value: raw.clone(),
            })?;
            invalid_windows.insert(ts);
        }

        let read_u64 = |path: &str| -> Result<u64, ConfigError> {
            match config.extra_string(path) {
                None => Ok(0),
                Some(raw) => raw.parse().map_err(|_| ConfigError::TypeCoercion {
                    path: path.to_string(),
                    expected: FieldKind::Integer.name(),
                    value: raw,
                }),
            }
        };

        Ok(Self {
            streams: config.extra_string_list("demo.streams")?,
            invalid_windows,
            transient_failures: narrow(
                read_u64("demo.transient_failures")?,
                "demo.transient_failures",
            )?,
            latency: Duration::from_millis(read_u64("demo.latency_ms")?),
            attempts: Mutex::new(HashMap::new()),
        })
    }

    /// Make the window starting at `start` return an out-of-window sample
    pub fn with_invalid_window(mut self, start: DateTime<Utc>) -> Self {
        self.invalid_windows.insert(start);
        self
    }

    /// Fail the first `n` attempts of every window with a transient error
    pub fn with_transient_failures(mut self, n: u32) -> Self {
        self.transient_failures = n;
        self
    }

    fn render(&self, stream: Option<&str>, window: &FetchWindow) -> DemoDocument {
        let mut points = Vec::new();
        let mut ts = window.start;
        while ts < window.end {
            points.push(DemoPoint {
                ts,
                value: 20.0 + 1.5 * f64::from(ts.hour()),
            });
            ts += ChronoDuration::hours(1);
        }

        if self.invalid_windows.contains(&window.start) {
            points.push(DemoPoint {
                ts: window.end,
                value: f64::from(window.end.hour()),
            });
        }

        DemoDocument {
            source_id: SOURCE_ID.to_string(),
            stream: stream.map(str::to_string),
            start: window.start,
            end: window.end,
            points,
        }
    }

    fn next_attempt(&self, stream: Option<&str>, window: &FetchWindow) -> u32 {
        let mut attempts = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let count = attempts
            .entry((stream.map(str::to_string), window.start))
            .or_insert(0);
        *count += 1;
        *count
    }
}

impl Default for DemoProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for DemoProvider {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn streams(&self) -> Vec<String> {
        self.streams.clone()
    }

    async fn fetch(&self, stream: Option<&str>, window: &FetchWindow) -> AttemptOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let attempt = self.next_attempt(stream, window);
        if attempt <= self.transient_failures {
            debug!(attempt, window = %window, "Injecting transient demo failure");
            return Err(AttemptFailure::transient(format!(
                "synthetic outage (attempt {attempt})"
            )));
        }

        let document = self.render(stream, window);
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| AttemptFailure::new(FailureKind::ValidationFailure, e.to_string()))?;

        Ok(FetchedPayload {
            bytes: bytes.into(),
            content_type: Some("application/json".to_string()),
            etag: None,
        })
    }

    fn validate(
        &self,
        _stream: Option<&str>,
        window: &FetchWindow,
        payload: &FetchedPayload,
    ) -> Result<(), String> {
        let document: DemoDocument =
            serde_json::from_slice(&payload.bytes).map_err(|e| format!("invalid JSON: {e}"))?;

        if document.start != window.start || document.end != window.end {
            return Err(format!(
                "document covers [{}, {}) instead of {}",
                document.start, document.end, window
            ));
        }
        if document.points.is_empty() {
            return Err("document has no points".to_string());
        }
        if let Some(point) = document
            .points
            .iter()
            .find(|p| p.ts < window.start || p.ts >= window.end)
        {
            return Err(format!("point at {} lies outside {}", point.ts, window));
        }
        Ok(())
    }

    fn artifact_extension(&self) -> &str {
        "json"
    }
}

/// Registry factory
pub fn create(config: &SourceConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    Ok(Arc::new(DemoProvider::from_config(config)?))
}
