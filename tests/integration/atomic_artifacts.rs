//! Stage, commit, publish ordering and crash recovery

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use grid_data_downloader::downloader::{CrawlEngine, CrawlError, CrawlStatus};
use grid_data_downloader::fetcher::demo::DemoProvider;
use grid_data_downloader::fetcher::FetchedPayload;
use grid_data_downloader::output::{ArtifactStore, RawArtifact, STAGING_DIR};
use grid_data_downloader::resume::{
    CheckpointError, CheckpointKey, CheckpointStore, CrawlCheckpoint, FileCheckpointStore,
};
use grid_data_downloader::{ConfigRegistry, FetchWindow, SourceConfig, TimeRange};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap()
}

fn config(raw: &Path) -> SourceConfig {
    let yaml = format!("paths:\n  dst_dir_raw: {}\n", raw.display());
    ConfigRegistry::builtin()
        .resolve_str("demo", &yaml, &[])
        .unwrap()
}

fn artifact(window: FetchWindow) -> RawArtifact {
    RawArtifact {
        stream: None,
        window,
        extension: "json".to_string(),
        payload: FetchedPayload::new(b"{}".to_vec()),
        request: "synthetic".to_string(),
        fetched_at: Utc::now(),
    }
}

fn staged_files(raw: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(raw.join(STAGING_DIR)) {
        Ok(entries) => entries
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_file())
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Checks at commit time that the window's artifact is staged but not yet visible
struct ObservingStore {
    inner: FileCheckpointStore,
    artifacts: ArtifactStore,
    commits: AtomicUsize,
}

#[async_trait]
impl CheckpointStore for ObservingStore {
    async fn load(&self, key: &CheckpointKey) -> Result<Option<CrawlCheckpoint>, CheckpointError> {
        self.inner.load(key).await
    }

    async fn commit(
        &self,
        key: &CheckpointKey,
        window: &FetchWindow,
    ) -> Result<CrawlCheckpoint, CheckpointError> {
        let visible = self.artifacts.artifact_path(None, window, "json");
        assert!(
            !visible.exists(),
            "artifact for {window} visible before its commit"
        );
        assert!(!staged_files(self.artifacts.root()).is_empty());
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(key, window).await
    }

    async fn reset(&self, key: &CheckpointKey) -> Result<(), CheckpointError> {
        self.inner.reset(key).await
    }
}

/// Rejects every commit
struct FailingStore;

#[async_trait]
impl CheckpointStore for FailingStore {
    async fn load(&self, _key: &CheckpointKey) -> Result<Option<CrawlCheckpoint>, CheckpointError> {
        Ok(None)
    }

    async fn commit(
        &self,
        _key: &CheckpointKey,
        _window: &FetchWindow,
    ) -> Result<CrawlCheckpoint, CheckpointError> {
        Err(CheckpointError::IoError("disk full".to_string()))
    }

    async fn reset(&self, _key: &CheckpointKey) -> Result<(), CheckpointError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_artifact_published_only_after_commit() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw");
    let artifacts = ArtifactStore::open(&raw, "demo").unwrap();
    let store = Arc::new(ObservingStore {
        inner: FileCheckpointStore::open(&raw).unwrap(),
        artifacts: artifacts.clone(),
        commits: AtomicUsize::new(0),
    });

    let engine = CrawlEngine::new(
        config(&raw),
        Arc::new(DemoProvider::new()),
        store.clone(),
        artifacts.clone(),
    );
    let report = engine
        .run(TimeRange::new(day(1), day(4)).unwrap())
        .await
        .unwrap();

    assert_eq!(report.status(), CrawlStatus::Completed);
    assert_eq!(store.commits.load(Ordering::SeqCst), 3);
    for d in 1..4 {
        let window = FetchWindow::new(day(d), day(d + 1));
        assert!(artifacts.artifact_path(None, &window, "json").exists());
    }
    assert!(staged_files(&raw).is_empty());
}

#[tokio::test]
async fn test_failed_commit_leaves_no_visible_artifact() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw");
    let artifacts = ArtifactStore::open(&raw, "demo").unwrap();
    let engine = CrawlEngine::new(
        config(&raw),
        Arc::new(DemoProvider::new()),
        Arc::new(FailingStore),
        artifacts.clone(),
    );

    let result = engine.run(TimeRange::new(day(1), day(3)).unwrap()).await;
    assert!(matches!(result, Err(CrawlError::Checkpoint(_))));

    let window = FetchWindow::new(day(1), day(2));
    assert!(!artifacts.artifact_path(None, &window, "json").exists());
    assert!(staged_files(&raw).is_empty());
}

#[tokio::test]
async fn test_recovery_publishes_committed_and_drops_uncommitted_staging() {
    let dir = TempDir::new().unwrap();
    let raw = dir.path().join("raw");
    let artifacts = ArtifactStore::open(&raw, "demo").unwrap();
    let checkpoints = FileCheckpointStore::open(&raw).unwrap();
    let key = CheckpointKey::new("demo", None);

    // Crash after commit but before publish
    let committed = FetchWindow::new(day(1), day(2));
    let staged = artifacts.stage(&artifact(committed.clone())).unwrap();
    checkpoints.commit(&key, &committed).await.unwrap();
    drop(staged);

    // Crash after staging, before commit
    let orphan = FetchWindow::new(day(2), day(3));
    let staged = artifacts.stage(&artifact(orphan.clone())).unwrap();
    drop(staged);

    let engine = CrawlEngine::open(config(&raw), Arc::new(DemoProvider::new())).unwrap();
    let report = engine
        .run(TimeRange::new(day(1), day(3)).unwrap())
        .await
        .unwrap();

    assert_eq!(report.status(), CrawlStatus::Completed);
    assert_eq!(report.streams[0].committed, vec![orphan.clone()]);

    let recovered = std::fs::read(artifacts.artifact_path(None, &committed, "json")).unwrap();
    assert_eq!(recovered, b"{}");
    let refetched = std::fs::read(artifacts.artifact_path(None, &orphan, "json")).unwrap();
    assert_ne!(refetched, b"{}");
    assert!(staged_files(&raw).is_empty());
}
