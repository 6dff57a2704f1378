//! Checkpoint record for one crawl stream

use super::CheckpointError;
use crate::FetchWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Current checkpoint schema version
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Committed windows kept for diagnostics; only the newest is needed to resume
pub const MAX_RECENT_WINDOWS: usize = 5;

/// Identifies one checkpointed stream of one source
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CheckpointKey {
    source_id: String,
    stream: Option<String>,
}

impl CheckpointKey {
    /// Key for a source and optional sub-stream
    pub fn new(source_id: impl Into<String>, stream: Option<&str>) -> Self {
        Self {
            source_id: source_id.into(),
            stream: stream.map(str::to_string),
        }
    }

    /// Source identifier
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Stream key, if the source has sub-streams
    pub fn stream(&self) -> Option<&str> {
        self.stream.as_deref()
    }

    /// `<source>.json` or `<source>__<stream>.json`
    pub fn file_name(&self) -> String {
        match &self.stream {
            None => format!("{}.json", self.source_id),
            Some(stream) => format!("{}__{}.json", self.source_id, sanitize(stream)),
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.stream {
            None => write!(f, "{}", self.source_id),
            Some(stream) => write!(f, "{}/{}", self.source_id, stream),
        }
    }
}

/// Replace characters that are unsafe in file names
pub(crate) fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One committed window, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedWindow {
    /// Window start
    pub start: DateTime<Utc>,
    /// Window end
    pub end: DateTime<Utc>,
    /// Cursor the window was fetched with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// When the commit happened
    pub committed_at: DateTime<Utc>,
}

/// Durable crawl progress of one stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCheckpoint {
    schema_version: String,
    source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stream: Option<String>,
    last_completed_end: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_cursor: Option<String>,
    windows_committed: u64,
    recent: Vec<CommittedWindow>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl CrawlCheckpoint {
    /// Checkpoint created by the first committed window
    pub fn first(key: &CheckpointKey, window: &FetchWindow) -> Self {
        let now = Utc::now();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            source_id: key.source_id.clone(),
            stream: key.stream.clone(),
            last_completed_end: window.end,
            last_cursor: window.cursor.clone(),
            windows_committed: 1,
            recent: vec![CommittedWindow {
                start: window.start,
                end: window.end,
                cursor: window.cursor.clone(),
                committed_at: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Schema version the record was written with
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Source identifier
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Stream key
    pub fn stream(&self) -> Option<&str> {
        self.stream.as_deref()
    }

    /// Exclusive end of the committed prefix
    pub fn last_completed_end(&self) -> DateTime<Utc> {
        self.last_completed_end
    }

    /// Cursor of the last committed window
    pub fn last_cursor(&self) -> Option<&str> {
        self.last_cursor.as_deref()
    }

    /// Total windows committed since creation
    pub fn windows_committed(&self) -> u64 {
        self.windows_committed
    }

    /// Most recent commits, oldest first
    pub fn recent(&self) -> &[CommittedWindow] {
        &self.recent
    }

    /// Last update time
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether this record belongs to `key`
    pub fn matches(&self, key: &CheckpointKey) -> bool {
        self.source_id == key.source_id && self.stream == key.stream
    }

    /// Advance past `window`
    ///
    /// A window ending before the current end is rejected. A window ending
    /// exactly at the current end is an already-applied commit and leaves the
    /// record untouched.
    pub fn advance(&mut self, window: &FetchWindow) -> Result<bool, CheckpointError> {
        if window.end < self.last_completed_end {
            return Err(CheckpointError::Regression {
                current: self.last_completed_end,
                attempted: window.end,
            });
        }
        if window.end == self.last_completed_end {
            debug!(window = %window, "Window already committed");
            return Ok(false);
        }

        let now = Utc::now();
        self.last_completed_end = window.end;
        self.last_cursor = window.cursor.clone();
        self.windows_committed += 1;
        self.recent.push(CommittedWindow {
            start: window.start,
            end: window.end,
            cursor: window.cursor.clone(),
            committed_at: now,
        });
        if self.recent.len() > MAX_RECENT_WINDOWS {
            let drain_count = self.recent.len() - MAX_RECENT_WINDOWS;
            self.recent.drain(0..drain_count);
        }
        self.updated_at = now;
        Ok(true)
    }
}
