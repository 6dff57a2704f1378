//! Integration tests for durable per-stream checkpoints

use chrono::{DateTime, TimeZone, Utc};
use grid_data_downloader::resume::{
    verify_checkpoints, CheckpointError, CheckpointKey, CheckpointStore, CrawlCheckpoint,
    FileCheckpointStore, MAX_RECENT_WINDOWS,
};
use grid_data_downloader::FetchWindow;
use std::sync::Arc;
use tempfile::TempDir;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

fn window(from: u32, to: u32) -> FetchWindow {
    FetchWindow::new(day(from), day(to))
}

#[tokio::test]
async fn test_commit_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let key = CheckpointKey::new("entsoe", Some("10YFR-RTE------C"));

    {
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        store.commit(&key, &window(1, 2)).await.unwrap();
        store.commit(&key, &window(2, 3)).await.unwrap();
    }

    let reopened = FileCheckpointStore::open(dir.path()).unwrap();
    let checkpoint = reopened.load(&key).await.unwrap().unwrap();
    assert_eq!(checkpoint.last_completed_end(), day(3));
    assert_eq!(checkpoint.windows_committed(), 2);
    assert_eq!(checkpoint.source_id(), "entsoe");
    assert_eq!(checkpoint.stream(), Some("10YFR-RTE------C"));
}

#[tokio::test]
async fn test_load_before_first_commit_is_none() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    let loaded = store.load(&CheckpointKey::new("demo", None)).await.unwrap();
    assert!(loaded.is_none());
}

#[tokio::test]
async fn test_regression_is_rejected_and_record_unchanged() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    let key = CheckpointKey::new("demo", None);
    store.commit(&key, &window(3, 4)).await.unwrap();

    let err = store.commit(&key, &window(1, 2)).await.unwrap_err();
    assert!(matches!(err, CheckpointError::Regression { .. }));

    let checkpoint = store.load(&key).await.unwrap().unwrap();
    assert_eq!(checkpoint.last_completed_end(), day(4));
    assert_eq!(checkpoint.windows_committed(), 1);
}

#[tokio::test]
async fn test_recommitting_same_window_is_noop() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    let key = CheckpointKey::new("demo", None);

    let first = store.commit(&key, &window(1, 2)).await.unwrap();
    let second = store.commit(&key, &window(1, 2)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(second.windows_committed(), 1);
}

#[tokio::test]
async fn test_streams_are_isolated() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    let north = CheckpointKey::new("demo", Some("north"));
    let south = CheckpointKey::new("demo", Some("south"));

    store.commit(&north, &window(1, 5)).await.unwrap();
    store.commit(&south, &window(1, 2)).await.unwrap();

    assert_eq!(
        store.load(&north).await.unwrap().unwrap().last_completed_end(),
        day(5)
    );
    assert_eq!(
        store.load(&south).await.unwrap().unwrap().last_completed_end(),
        day(2)
    );
    assert_eq!(store.list().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cursor_is_recorded() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    let key = CheckpointKey::new("demo", None);

    let mut w = window(1, 2);
    w.cursor = Some("page-7".to_string());
    let checkpoint = store.commit(&key, &w).await.unwrap();
    assert_eq!(checkpoint.last_cursor(), Some("page-7"));
}

#[tokio::test]
async fn test_recent_windows_are_bounded() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    let key = CheckpointKey::new("demo", None);

    for d in 1..=(MAX_RECENT_WINDOWS as u32 + 3) {
        store.commit(&key, &window(d, d + 1)).await.unwrap();
    }
    let checkpoint = store.load(&key).await.unwrap().unwrap();
    assert_eq!(checkpoint.recent().len(), MAX_RECENT_WINDOWS);
    assert_eq!(
        checkpoint.recent().last().unwrap().end,
        checkpoint.last_completed_end()
    );
}

#[tokio::test]
async fn test_reset_forgets_progress() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    let key = CheckpointKey::new("demo", None);
    store.commit(&key, &window(1, 2)).await.unwrap();

    store.reset(&key).await.unwrap();
    assert!(store.load(&key).await.unwrap().is_none());

    // Resetting twice is fine
    store.reset(&key).await.unwrap();
}

#[tokio::test]
async fn test_concurrent_commits_to_one_key_serialize() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileCheckpointStore::open(dir.path()).unwrap());
    let key = CheckpointKey::new("demo", None);

    let mut handles = Vec::new();
    for d in 1..=8 {
        let store = store.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            store.commit(&key, &window(d, d + 1)).await
        }));
    }
    for handle in handles {
        // Out-of-order commits may regress, but never corrupt the record
        let _ = handle.await.unwrap();
    }

    let checkpoint = store.load(&key).await.unwrap().unwrap();
    assert!(checkpoint.last_completed_end() <= day(9));
    assert!(checkpoint.windows_committed() >= 1);
}

#[test]
fn test_checkpoint_serialization_has_schema_version() {
    let key = CheckpointKey::new("demo", None);
    let checkpoint = CrawlCheckpoint::first(&key, &window(1, 2));
    let json = serde_json::to_string(&checkpoint).unwrap();
    assert!(json.contains("schema_version"));
    assert!(json.contains("1.0.0"));

    let parsed: CrawlCheckpoint = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, checkpoint);
}

#[tokio::test]
async fn test_verify_reports_corrupt_file() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    store
        .commit(&CheckpointKey::new("demo", None), &window(1, 2))
        .await
        .unwrap();
    std::fs::write(store.root().join("demo__broken.json"), "{ not json").unwrap();

    let health = verify_checkpoints(store.root()).unwrap();
    assert_eq!(health.len(), 2);
    assert_eq!(health.iter().filter(|h| h.result.is_ok()).count(), 1);
    let broken = health.iter().find(|h| h.result.is_err()).unwrap();
    assert!(broken.path.ends_with("demo__broken.json"));
}

#[tokio::test]
async fn test_corrupt_file_fails_load() {
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::open(dir.path()).unwrap();
    let key = CheckpointKey::new("demo", None);
    std::fs::write(store.path_for(&key), "garbage").unwrap();

    let err = store.load(&key).await.unwrap_err();
    assert!(matches!(err, CheckpointError::DeserializationError(_)));
}
