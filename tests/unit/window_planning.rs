//! Unit tests for remaining-range and window partitioning

use chrono::{DateTime, TimeZone, Utc};
use grid_data_downloader::downloader::{plan_windows, remaining_range};
use grid_data_downloader::{Granularity, TimeRange};

fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> TimeRange {
    TimeRange::new(start, end).unwrap()
}

#[test]
fn test_daily_windows_align_to_midnight() {
    let windows = plan_windows(
        &range(ts(2024, 1, 1, 6), ts(2024, 1, 3, 12)),
        Granularity::Daily,
    );
    let bounds: Vec<_> = windows.iter().map(|w| (w.start, w.end)).collect();
    assert_eq!(
        bounds,
        vec![
            (ts(2024, 1, 1, 6), ts(2024, 1, 2, 0)),
            (ts(2024, 1, 2, 0), ts(2024, 1, 3, 0)),
            (ts(2024, 1, 3, 0), ts(2024, 1, 3, 12)),
        ]
    );
}

#[test]
fn test_monthly_windows_follow_calendar() {
    let windows = plan_windows(
        &range(ts(2023, 11, 15, 0), ts(2024, 3, 1, 0)),
        Granularity::Monthly,
    );
    let starts: Vec<_> = windows.iter().map(|w| w.start).collect();
    assert_eq!(
        starts,
        vec![
            ts(2023, 11, 15, 0),
            ts(2023, 12, 1, 0),
            ts(2024, 1, 1, 0),
            ts(2024, 2, 1, 0),
        ]
    );
    assert_eq!(windows.last().unwrap().end, ts(2024, 3, 1, 0));
}

#[test]
fn test_leap_day_is_a_window() {
    let windows = plan_windows(
        &range(ts(2024, 2, 28, 0), ts(2024, 3, 1, 0)),
        Granularity::Daily,
    );
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[1].start, ts(2024, 2, 29, 0));
}

#[test]
fn test_yearly_and_hourly_counts() {
    let years = plan_windows(
        &range(ts(2015, 1, 1, 0), ts(2025, 1, 1, 0)),
        Granularity::Yearly,
    );
    assert_eq!(years.len(), 10);

    let hours = plan_windows(
        &range(ts(2024, 1, 1, 0), ts(2024, 1, 2, 0)),
        Granularity::Hourly,
    );
    assert_eq!(hours.len(), 24);
}

#[test]
fn test_windows_cover_range_without_gaps() {
    let requested = range(ts(2019, 7, 3, 5), ts(2021, 2, 11, 17));
    for granularity in [
        Granularity::Hourly,
        Granularity::Daily,
        Granularity::Monthly,
        Granularity::Yearly,
    ] {
        let windows = plan_windows(&requested, granularity);
        assert_eq!(windows.first().unwrap().start, requested.start());
        assert_eq!(windows.last().unwrap().end, requested.end());
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "{granularity}");
        }
        assert!(windows.iter().all(|w| w.start < w.end));
    }
}

#[test]
fn test_remaining_range_after_checkpoint() {
    let requested = range(ts(2024, 1, 1, 0), ts(2024, 1, 10, 0));

    let rest = remaining_range(&requested, Some(ts(2024, 1, 4, 0))).unwrap();
    assert_eq!(rest.start(), ts(2024, 1, 4, 0));
    assert_eq!(rest.end(), ts(2024, 1, 10, 0));

    let untouched = remaining_range(&requested, None).unwrap();
    assert_eq!(untouched, requested);

    // Checkpoint before the requested start changes nothing
    let earlier = remaining_range(&requested, Some(ts(2023, 6, 1, 0))).unwrap();
    assert_eq!(earlier.start(), requested.start());
}

#[test]
fn test_remaining_range_empty_when_covered() {
    let requested = range(ts(2024, 1, 1, 0), ts(2024, 1, 10, 0));
    assert!(remaining_range(&requested, Some(ts(2024, 1, 10, 0))).is_err());
    assert!(remaining_range(&requested, Some(ts(2024, 2, 1, 0))).is_err());
}

#[test]
fn test_empty_range_rejected() {
    assert!(TimeRange::new(ts(2024, 1, 2, 0), ts(2024, 1, 2, 0)).is_err());
    assert!(TimeRange::new(ts(2024, 1, 3, 0), ts(2024, 1, 2, 0)).is_err());
}
