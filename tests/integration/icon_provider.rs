//! ICON-DREAM-Global provider against a mock open-data server

use chrono::{DateTime, TimeZone, Utc};
use grid_data_downloader::downloader::{CrawlEngine, CrawlStatus};
use grid_data_downloader::fetcher::icon_dream_global::IconDreamGlobalProvider;
use grid_data_downloader::fetcher::{FailureKind, Provider};
use grid_data_downloader::{ConfigError, ConfigRegistry, FetchWindow, SourceConfig, TimeRange};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn month(m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, m, 1, 0, 0, 0).unwrap()
}

fn icon_config(dir: &TempDir, base_url: &str, variables: &str) -> SourceConfig {
    let yaml = format!(
        "paths:\n  dst_dir_raw: {}\nicon_dream_global:\n  variables: {variables}\n  base_url: {base_url}\ncrawl:\n  base_backoff_ms: 1\n  max_backoff_ms: 2\n",
        dir.path().join("raw").display()
    );
    ConfigRegistry::builtin()
        .resolve_str("icon_dream_global", &yaml, &[])
        .unwrap()
}

async fn crawl(
    config: SourceConfig,
    from: u32,
    to: u32,
) -> grid_data_downloader::downloader::SourceReport {
    let provider = ConfigRegistry::builtin().create_provider(&config).unwrap();
    CrawlEngine::open(config, provider)
        .unwrap()
        .run(TimeRange::new(month(from), month(to)).unwrap())
        .await
        .unwrap()
}

fn grib(body: &str) -> Vec<u8> {
    format!("GRIB{body}7777").into_bytes()
}

#[tokio::test]
async fn test_monthly_files_are_downloaded_per_variable() {
    let server = MockServer::start().await;
    for (var, m) in [("T_2M", "01"), ("T_2M", "02"), ("TOT_PREC", "01"), ("TOT_PREC", "02")] {
        Mock::given(method("GET"))
            .and(path(format!(
                "/{var}/ICON-DREAM-Global_2024{m}_{var}_hourly.grb"
            )))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(grib(var)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let config = icon_config(&dir, &server.uri(), "[T_2M, TOT_PREC]");
    let report = crawl(config, 1, 3).await;

    assert_eq!(report.status(), CrawlStatus::Completed);
    assert_eq!(report.streams.len(), 2);
    assert_eq!(report.committed_windows(), 4);

    let stored = dir
        .path()
        .join("raw")
        .join("T_2M")
        .join("icon_dream_global_20240101T000000Z_20240201T000000Z.grb");
    assert_eq!(std::fs::read(stored).unwrap(), grib("T_2M"));
}

#[tokio::test]
async fn test_missing_month_is_malformed_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/T/ICON-DREAM-Global_202401_T_hourly.grb"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(grib("jan")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = icon_config(&dir, &server.uri(), "[T]");
    let report = crawl(config, 1, 4).await;

    let stream = &report.streams[0];
    assert_eq!(stream.status, CrawlStatus::Failed);
    assert_eq!(stream.committed, vec![FetchWindow::new(month(1), month(2))]);
    let failure = stream.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::MalformedRequest);
    assert_eq!(failure.window.start, month(2));
}

#[tokio::test]
async fn test_truncated_file_fails_validation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"GRIB....cut".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = icon_config(&dir, &server.uri(), "[T]");
    let report = crawl(config, 1, 2).await;

    let failure = report.streams[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::ValidationFailure);
    assert!(!dir.path().join("raw").join("T").exists()
        || std::fs::read_dir(dir.path().join("raw").join("T"))
            .unwrap()
            .next()
            .is_none());
}

#[test]
fn test_unknown_variable_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = icon_config(&dir, "http://localhost", "[NOT_A_FIELD]");
    assert!(ConfigRegistry::builtin().create_provider(&config).is_err());
}

#[test]
fn test_non_monthly_granularity_is_rejected() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        "paths:\n  dst_dir_raw: {}\n",
        dir.path().join("raw").display()
    );
    for granularity in ["daily", "hourly", "yearly"] {
        let config = ConfigRegistry::builtin()
            .resolve_str(
                "icon_dream_global",
                &yaml,
                &[("crawl.granularity".to_string(), granularity.to_string())],
            )
            .unwrap();
        let err = ConfigRegistry::builtin()
            .create_provider(&config)
            .err()
            .unwrap();
        assert!(
            matches!(err, ConfigError::InvalidValue { ref path, .. } if path == "crawl.granularity"),
            "{granularity}: {err:?}"
        );
    }
}

#[tokio::test]
async fn test_mid_month_range_is_not_fetched() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(grib("jan")))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = icon_config(&dir, &server.uri(), "[T]");
    let provider = ConfigRegistry::builtin().create_provider(&config).unwrap();
    let range = TimeRange::new(
        Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
        month(3),
    )
    .unwrap();
    let report = CrawlEngine::open(config, provider)
        .unwrap()
        .run(range)
        .await
        .unwrap();

    let stream = &report.streams[0];
    assert_eq!(stream.status, CrawlStatus::Failed);
    assert!(stream.committed.is_empty());
    let failure = stream.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::MalformedRequest);
    assert_eq!(failure.attempts, 1);
    assert!(failure.message.contains("calendar month"));
}

#[test]
fn test_default_variable_is_temperature() {
    let dir = TempDir::new().unwrap();
    let yaml = format!(
        "paths:\n  dst_dir_raw: {}\n",
        dir.path().join("raw").display()
    );
    let config = ConfigRegistry::builtin()
        .resolve_str("icon_dream_global", &yaml, &[])
        .unwrap();
    let provider = IconDreamGlobalProvider::from_config(&config).unwrap();
    assert_eq!(provider.streams(), vec!["T".to_string()]);
    assert_eq!(provider.artifact_extension(), "grb");
}
