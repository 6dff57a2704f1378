//! Retry classification and attempt accounting through the engine

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use grid_data_downloader::downloader::{CrawlEngine, CrawlStatus, RetryPolicy};
use grid_data_downloader::fetcher::{
    AttemptFailure, AttemptOutcome, FailureKind, FetchedPayload, Provider,
};
use grid_data_downloader::{ConfigRegistry, FetchWindow, SourceConfig, TimeRange};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

fn config(dir: &TempDir, overrides: &[(&str, &str)]) -> SourceConfig {
    let yaml = format!(
        "paths:\n  dst_dir_raw: {}\ncrawl:\n  base_backoff_ms: 1\n  max_backoff_ms: 2\n",
        dir.path().join("raw").display()
    );
    let overrides: Vec<(String, String)> = overrides
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    ConfigRegistry::builtin()
        .resolve_str("demo", &yaml, &overrides)
        .unwrap()
}

/// Replays scripted failures, then succeeds
struct ScriptedProvider {
    script: Mutex<VecDeque<AttemptFailure>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn new(failures: Vec<AttemptFailure>) -> Self {
        Self {
            script: Mutex::new(failures.into()),
            calls: AtomicU32::new(0),
        }
    }

    fn always(kind: FailureKind) -> Self {
        Self::new(
            (0..100)
                .map(|i| AttemptFailure::new(kind, format!("scripted failure {i}")))
                .collect(),
        )
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn source_id(&self) -> &str {
        "demo"
    }

    async fn fetch(&self, _stream: Option<&str>, _window: &FetchWindow) -> AttemptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().unwrap().pop_front() {
            Some(failure) => Err(failure),
            None => Ok(FetchedPayload::new(b"payload".to_vec())),
        }
    }

    fn artifact_extension(&self) -> &str {
        "bin"
    }
}

async fn run_one_window(
    dir: &TempDir,
    provider: Arc<ScriptedProvider>,
    overrides: &[(&str, &str)],
) -> grid_data_downloader::downloader::SourceReport {
    let engine = CrawlEngine::open(config(dir, overrides), provider).unwrap();
    engine
        .run(TimeRange::new(day(1), day(2)).unwrap())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_max_attempts_override_bounds_attempts() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::always(FailureKind::Transient));

    let report = run_one_window(&dir, provider.clone(), &[("crawl.max_attempts", "3")]).await;

    assert_eq!(provider.calls(), 3);
    assert_eq!(report.status(), CrawlStatus::Failed);
    let failure = report.streams[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Transient);
    assert_eq!(failure.attempts, 3);
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::always(FailureKind::AuthFailure));

    let report = run_one_window(&dir, provider.clone(), &[]).await;

    assert_eq!(provider.calls(), 1);
    let failure = report.streams[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::AuthFailure);
    assert_eq!(failure.attempts, 1);
}

#[tokio::test]
async fn test_malformed_request_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::always(FailureKind::MalformedRequest));

    let report = run_one_window(&dir, provider.clone(), &[]).await;

    assert_eq!(provider.calls(), 1);
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_mixed_transient_failures_recover() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![
        AttemptFailure::transient("connection reset"),
        AttemptFailure::new(FailureKind::RateLimited, "HTTP 429"),
    ]));

    let report = run_one_window(&dir, provider.clone(), &[]).await;

    assert_eq!(provider.calls(), 3);
    assert_eq!(report.status(), CrawlStatus::Completed);
    assert_eq!(report.committed_windows(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_hint_is_honoured() {
    let dir = TempDir::new().unwrap();
    let provider = Arc::new(ScriptedProvider::new(vec![AttemptFailure::new(
        FailureKind::RateLimited,
        "HTTP 429",
    )
    .with_retry_after(Some(Duration::from_secs(7)))]));

    let start = tokio::time::Instant::now();
    let report = run_one_window(&dir, provider.clone(), &[]).await;

    assert_eq!(report.status(), CrawlStatus::Completed);
    assert!(start.elapsed() >= Duration::from_secs(7));
}

#[tokio::test]
async fn test_empty_payload_is_validation_failure() {
    struct EmptyProvider;

    #[async_trait]
    impl Provider for EmptyProvider {
        fn source_id(&self) -> &str {
            "demo"
        }

        async fn fetch(&self, _stream: Option<&str>, _window: &FetchWindow) -> AttemptOutcome {
            Ok(FetchedPayload::new(Vec::new()))
        }

        fn artifact_extension(&self) -> &str {
            "bin"
        }
    }

    let dir = TempDir::new().unwrap();
    let engine = CrawlEngine::open(config(&dir, &[]), Arc::new(EmptyProvider)).unwrap();
    let report = engine
        .run(TimeRange::new(day(1), day(2)).unwrap())
        .await
        .unwrap();

    let failure = report.streams[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::ValidationFailure);
    assert_eq!(failure.attempts, 1);
}

#[test]
fn test_policy_backoff_is_capped() {
    let policy = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_secs(1))
        .without_jitter();
    assert_eq!(policy.backoff(1), Duration::from_millis(100));
    assert_eq!(policy.backoff(2), Duration::from_millis(200));
    assert_eq!(policy.backoff(3), Duration::from_millis(400));
    assert_eq!(policy.backoff(8), Duration::from_secs(1));
}
