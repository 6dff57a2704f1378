//! Prometheus exporter wiring
//!
//! The exporter is process-global, so everything that needs it lives in one test.

use grid_data_downloader::fetcher::FailureKind;
use grid_data_downloader::metrics;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::sleep;

/// Helper to fetch metrics text from endpoint
async fn fetch_metrics_text(addr: &str) -> Result<String, Box<dyn std::error::Error>> {
    let url = format!("http://{}/metrics", addr);
    let resp = reqwest::get(&url).await?;
    Ok(resp.text().await?)
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_crawl_counters() {
    let addr: SocketAddr = "127.0.0.1:19090".parse().unwrap();
    metrics::init_metrics(addr).unwrap();

    // Idempotent
    metrics::init_metrics(addr).unwrap();

    let attempt = metrics::FetchMetrics::start("demo", 1);
    attempt.record(None);
    let retry = metrics::FetchMetrics::start("demo", 2);
    retry.record(Some(FailureKind::Transient));
    metrics::record_retry_backoff("demo", Duration::from_millis(250), 1);
    metrics::record_rate_limit_wait("demo", Duration::from_millis(5));
    metrics::record_window_committed("demo");
    metrics::record_crawl_failure("demo", FailureKind::ValidationFailure);

    // Give the listener time to start
    let mut text = String::new();
    for _ in 0..20 {
        if let Ok(body) = fetch_metrics_text("127.0.0.1:19090").await {
            text = body;
            break;
        }
        sleep(Duration::from_millis(50)).await;
    }

    assert!(text.contains("window_attempts_total"), "{text}");
    assert!(text.contains("windows_committed_total"));
    assert!(text.contains("crawl_failures_total"));
    assert!(text.contains("source=\"demo\""));
}

#[test]
fn test_recording_without_exporter_is_noop() {
    // Recording must not panic whether or not an exporter is installed
    metrics::record_window_committed("demo");
    metrics::record_crawl_failure("demo", FailureKind::AuthFailure);
}
