use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use grid_data_downloader::downloader::{CrawlEngine, CrawlStatus, EXIT_CANCELLED};
use grid_data_downloader::output::STAGING_DIR;
use grid_data_downloader::resume::{CheckpointKey, CheckpointStore, FileCheckpointStore};
use grid_data_downloader::shutdown::ShutdownCoordinator;
use grid_data_downloader::{ConfigRegistry, TimeRange};
use tempfile::TempDir;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

fn slow_demo_engine(dir: &TempDir, extra: &str) -> CrawlEngine {
    let yaml = format!(
        "paths:\n  dst_dir_raw: {}\ncrawl:\n  base_backoff_ms: 500\n  max_backoff_ms: 500\n{extra}",
        dir.path().join("raw").display()
    );
    let registry = ConfigRegistry::builtin();
    let config = registry.resolve_str("demo", &yaml, &[]).unwrap();
    let provider = registry.create_provider(&config).unwrap();
    CrawlEngine::open(config, provider).unwrap()
}

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    // Give the task time to start waiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// A request issued before anyone waits must not be lost.
#[tokio::test]
async fn shutdown_race_condition_no_deadlock() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let handle = shutdown.clone();
    let waiter = tokio::spawn(async move {
        handle.wait_for_shutdown().await;
        true
    });

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok(), "wait_for_shutdown() deadlocked despite shutdown already requested");
}

#[tokio::test]
async fn shutdown_concurrent_waiters_all_notified() {
    let shutdown = ShutdownCoordinator::shared();

    let mut waiters = Vec::new();
    for _ in 0..10 {
        let handle = shutdown.clone();
        waiters.push(tokio::spawn(async move {
            handle.wait_for_shutdown().await;
        }));
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    shutdown.request_shutdown();

    for waiter in waiters {
        let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(result.is_ok(), "A waiter was not notified of shutdown");
    }
}

/// Ctrl+C mid-crawl keeps every committed window and nothing after it.
#[tokio::test(start_paused = true)]
async fn shutdown_mid_crawl_stops_at_last_commit() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let engine = slow_demo_engine(&dir, "demo:\n  latency_ms: 1000\n").with_shutdown(shutdown.clone());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            shutdown.request_shutdown();
        });
    }

    let report = engine
        .run(TimeRange::new(day(1), day(11)).unwrap())
        .await
        .unwrap();
    assert_eq!(report.status(), CrawlStatus::Cancelled);
    assert_eq!(report.exit_code(), EXIT_CANCELLED);

    let stream = &report.streams[0];
    assert!(!stream.committed.is_empty());
    assert!(stream.committed.len() < 10);

    let store = FileCheckpointStore::open(&dir.path().join("raw")).unwrap();
    let checkpoint = store
        .load(&CheckpointKey::new("demo", None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        checkpoint.last_completed_end(),
        stream.committed.last().unwrap().end
    );

    let leftovers = std::fs::read_dir(dir.path().join("raw").join(STAGING_DIR))
        .unwrap()
        .filter(|e| e.as_ref().unwrap().path().is_file())
        .count();
    assert_eq!(leftovers, 0);
}

/// Backoff sleeps end as soon as shutdown is requested.
#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_retry_backoff() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let engine = slow_demo_engine(&dir, "demo:\n  transient_failures: 100\n")
        .with_shutdown(shutdown.clone());

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            shutdown.request_shutdown();
        });
    }

    let start = tokio::time::Instant::now();
    let report = engine
        .run(TimeRange::new(day(1), day(3)).unwrap())
        .await
        .unwrap();

    assert_eq!(report.status(), CrawlStatus::Cancelled);
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(report.committed_windows(), 0);
}

/// A second run after cancellation resumes from the checkpoint.
#[tokio::test]
async fn resume_after_cancellation_completes_remaining_windows() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let cancelled = slow_demo_engine(&dir, "")
        .with_shutdown(shutdown)
        .run(TimeRange::new(day(1), day(4)).unwrap())
        .await
        .unwrap();
    assert_eq!(cancelled.status(), CrawlStatus::Cancelled);
    assert_eq!(cancelled.committed_windows(), 0);

    let resumed = slow_demo_engine(&dir, "")
        .run(TimeRange::new(day(1), day(4)).unwrap())
        .await
        .unwrap();
    assert_eq!(resumed.status(), CrawlStatus::Completed);
    assert_eq!(resumed.committed_windows(), 3);
}
