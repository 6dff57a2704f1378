//! Window planning
//!
//! Splits the part of a requested range not yet covered by a checkpoint into
//! ascending, disjoint windows aligned to calendar boundaries.

use crate::{EmptyRangeError, FetchWindow, Granularity, TimeRange};
use chrono::{DateTime, Utc};

/// Part of `requested` left after the committed prefix ending at `checkpoint_end`
///
/// Returns [`EmptyRangeError`] when nothing is left, which callers treat as a
/// successful no-op.
pub fn remaining_range(
    requested: &TimeRange,
    checkpoint_end: Option<DateTime<Utc>>,
) -> Result<TimeRange, EmptyRangeError> {
    let start = match checkpoint_end {
        Some(end) => requested.start().max(end),
        None => requested.start(),
    };
    TimeRange::new(start, requested.end())
}

/// Partition `range` into windows ending at successive `granularity` boundaries
///
/// The first window starts at `range.start()`, the last one is clipped to
/// `range.end()`, and concatenated they cover the range exactly.
pub fn plan_windows(range: &TimeRange, granularity: Granularity) -> Vec<FetchWindow> {
    let mut windows = Vec::new();
    let mut cursor = range.start();
    while cursor < range.end() {
        let boundary = granularity
            .next_boundary(cursor)
            .map_or(range.end(), |b| b.min(range.end()));
        windows.push(FetchWindow::new(cursor, boundary));
        cursor = boundary;
    }
    windows
}
