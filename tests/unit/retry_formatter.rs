use std::time::Duration;

use chrono::{TimeZone, Utc};
use grid_data_downloader::downloader::RetryContext;
use grid_data_downloader::fetcher::FailureKind;
use grid_data_downloader::FetchWindow;
use reqwest::StatusCode;

fn sample_context(kind: FailureKind) -> RetryContext {
    RetryContext {
        attempt: 2,
        max_attempts: 5,
        kind,
        backoff: Duration::from_secs(4),
        source_id: "entsoe".to_string(),
        stream: Some("10YDE-VE-------2".to_string()),
        window: FetchWindow::new(
            Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap(),
        ),
        error_message: "network timeout".to_string(),
        request: "GET https://web-api.tp.entsoe.eu/api?documentType=A73".to_string(),
    }
}

#[test]
fn format_retry_captures_attempt_and_wait() {
    let message = sample_context(FailureKind::RateLimited).format_retry();
    assert!(message.contains("attempt 3/5"));
    assert!(message.contains("rate limit exceeded"));
    assert!(message.contains("4.0 seconds"));
    assert!(message.contains("entsoe/10YDE-VE-------2"));
    assert!(message.contains("2024-01-05"));
}

#[test]
fn format_failure_lists_suggestions() {
    let output = sample_context(FailureKind::Transient).format_failure();
    assert!(output.contains("[FAILED] entsoe/10YDE-VE-------2 failed after 2 attempt(s)"));
    assert!(output.contains("Last error: network timeout"));
    assert!(output.contains("Request: GET https://web-api.tp.entsoe.eu/api"));
    assert!(output.contains("Check network connectivity"));
    assert!(output.contains("crawl.max_attempts (current: 5)"));
    assert!(output.contains("resume after the last committed window"));
}

#[test]
fn non_retryable_failure_skips_attempt_hint() {
    let suggestions = sample_context(FailureKind::AuthFailure).format_suggestions();
    assert!(suggestions[0].contains("access section"));
    assert!(!suggestions.iter().any(|s| s.contains("crawl.max_attempts")));
}

#[test]
fn status_codes_map_to_failure_kinds() {
    assert_eq!(
        FailureKind::from_status(StatusCode::BAD_REQUEST),
        Some(FailureKind::MalformedRequest)
    );
    assert_eq!(
        FailureKind::from_status(StatusCode::UNAUTHORIZED),
        Some(FailureKind::AuthFailure)
    );
    assert_eq!(
        FailureKind::from_status(StatusCode::FORBIDDEN),
        Some(FailureKind::AuthFailure)
    );
    assert_eq!(
        FailureKind::from_status(StatusCode::TOO_MANY_REQUESTS),
        Some(FailureKind::RateLimited)
    );
    assert_eq!(
        FailureKind::from_status(StatusCode::BAD_GATEWAY),
        Some(FailureKind::Transient)
    );
    assert_eq!(
        FailureKind::from_status(StatusCode::REQUEST_TIMEOUT),
        Some(FailureKind::Transient)
    );
    assert_eq!(FailureKind::from_status(StatusCode::OK), None);
}

#[test]
fn only_transient_kinds_are_retryable() {
    assert!(FailureKind::Transient.is_retryable());
    assert!(FailureKind::RateLimited.is_retryable());
    assert!(!FailureKind::ValidationFailure.is_retryable());
    assert!(!FailureKind::Cancelled.is_retryable());
}
