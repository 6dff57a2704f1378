//! Deterministic artifact paths
//!
//! Raw payloads are laid out as
//! `<dst_dir_raw>/[<stream>/]<source_id>_<START>_<END>.<ext>` with a
//! `.meta.json` sidecar next to each payload. Staged files use the same
//! relative layout under `<dst_dir_raw>/.staging/`.
//!
//! # Usage Example
//!
//! ```rust
//! use grid_data_downloader::output::ArtifactPathBuilder;
//! use grid_data_downloader::FetchWindow;
//! use chrono::{TimeZone, Utc};
//! use std::path::PathBuf;
//!
//! let window = FetchWindow::new(
//!     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
//! );
//! let path = ArtifactPathBuilder::new(PathBuf::from("data/raw/entsoe"), "entsoe")
//!     .with_stream(Some("10YFR-RTE------C"))
//!     .with_extension("xml")
//!     .build(&window);
//! assert_eq!(
//!     path,
//!     PathBuf::from("data/raw/entsoe/10YFR-RTE------C/entsoe_20240101T000000Z_20240102T000000Z.xml")
//! );
//! ```

use crate::WINDOW_STAMP_FORMAT;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Path, PathBuf};

/// Directory for staged, not yet committed artifacts
pub const STAGING_DIR: &str = ".staging";

/// Suffix of metadata sidecars
pub const META_SUFFIX: &str = ".meta.json";

/// Length of one `%Y%m%dT%H%M%SZ` stamp
const STAMP_LEN: usize = 16;

/// Builds payload paths for one source
#[derive(Debug, Clone)]
pub struct ArtifactPathBuilder {
    root_dir: PathBuf,
    source_id: String,
    stream: Option<String>,
    extension: String,
}

impl ArtifactPathBuilder {
    /// Builder rooted at a source's raw output directory
    pub fn new(root_dir: PathBuf, source_id: &str) -> Self {
        Self {
            root_dir,
            source_id: sanitize_component(source_id),
            stream: None,
            extension: "bin".to_string(),
        }
    }

    /// Place artifacts in a per-stream subdirectory
    ///
    /// The stream is sanitized so it cannot escape the root.
    pub fn with_stream(mut self, stream: Option<&str>) -> Self {
        self.stream = stream.map(sanitize_component);
        self
    }

    /// File extension without the dot
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Directory the artifacts land in
    pub fn directory(&self) -> PathBuf {
        match &self.stream {
            Some(stream) => self.root_dir.join(stream),
            None => self.root_dir.clone(),
        }
    }

    /// Payload file name for a window
    pub fn file_name(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
        format!(
            "{}_{}_{}.{}",
            self.source_id,
            start.format(WINDOW_STAMP_FORMAT),
            end.format(WINDOW_STAMP_FORMAT),
            self.extension
        )
    }

    /// Full payload path for a window
    pub fn build(&self, window: &crate::FetchWindow) -> PathBuf {
        self.directory().join(self.file_name(window.start, window.end))
    }
}

/// Sidecar path for a payload path
pub fn meta_path(payload: &Path) -> PathBuf {
    let mut name = payload
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(META_SUFFIX);
    payload.with_file_name(name)
}

/// Whether a file name is a metadata sidecar
pub fn is_meta_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(META_SUFFIX))
}

/// Recover `(start, end)` from a payload file name produced for `source_id`
pub fn parse_window_file_name(
    source_id: &str,
    file_name: &str,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let rest = file_name.strip_prefix(&format!("{}_", sanitize_component(source_id)))?;
    let start = rest.get(..STAMP_LEN)?;
    let end = rest
        .get(STAMP_LEN..)?
        .strip_prefix('_')?
        .get(..STAMP_LEN)?;
    let parse = |stamp: &str| {
        NaiveDateTime::parse_from_str(stamp, WINDOW_STAMP_FORMAT)
            .ok()
            .map(|dt| dt.and_utc())
    };
    Some((parse(start)?, parse(end)?))
}

/// Replace path separators and parent references
fn sanitize_component(name: &str) -> String {
    name.replace("..", "__").replace(['/', '\\', ':'], "_")
}
