//! Typed source configuration
//!
//! # Overview
//!
//! A [`SourceConfig`] is the immutable, validated description of one data
//! source: where raw output goes, which credentials to send, how windows are
//! sized, how aggressively to retry and how fast to call the provider.
//!
//! Configuration documents are YAML, one per source:
//!
//! ```yaml
//! paths:
//!   dst_dir_raw: data/raw/entsoe
//! access:
//!   api_key: 0000-aaaa
//! crawl:
//!   granularity: daily
//!   max_attempts: 5
//! rate_limit:
//!   max_requests: 400
//!   window_secs: 60
//! entsoe:
//!   bidding_zones: [10Y1001A1001A82H]
//! ```
//!
//! Documents are resolved by [`crate::registry::ConfigRegistry::resolve`]:
//! base YAML, then `-o dotted.path=value` overrides, then required-field
//! checks, then typed construction through [`SourceConfig::from_document`].

pub mod loader;
pub mod schema;

pub use loader::{load_yaml, parse_key_value_pairs, source_config_path};
pub use schema::{FieldKind, FieldSpec, COMMON_FIELDS};

use crate::Granularity;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Template values shipped in example configs that must be replaced before use
pub const ACCESS_PLACEHOLDERS: &[&str] = &["YOUR-SECRET", "COMMIT"];

/// Default attempts per window
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default backoff base (milliseconds)
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 1_000;
/// Default backoff ceiling (milliseconds)
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;
/// Upper bound on windows fetched ahead of the committed prefix
pub const MAX_PARALLEL_WINDOWS: usize = 16;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Source identifier is not registered
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    /// Source identifier registered twice
    #[error("source '{0}' is already registered")]
    DuplicateSource(String),

    /// Source identifier has an invalid format
    #[error("invalid source identifier '{0}': use lowercase letters, digits and '_'")]
    InvalidSourceId(String),

    /// Config file not found
    #[error("config file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// I/O error while reading a config file
    #[error("io error: {0}")]
    IoError(String),

    /// YAML could not be parsed
    #[error("parse error: {0}")]
    ParseError(String),

    /// Required field missing after overrides
    #[error("source '{source_id}': required field '{path}' is missing")]
    MissingField {
        /// Source identifier
        source_id: String,
        /// Dotted path
        path: String,
    },

    /// Override addresses a path the schema does not declare
    #[error("source '{source_id}': unknown override path '{path}'")]
    UnknownOverridePath {
        /// Source identifier
        source_id: String,
        /// Dotted path
        path: String,
    },

    /// Value could not be converted to the declared type
    #[error("field '{path}': expected {expected}, got '{value}'")]
    TypeCoercion {
        /// Dotted path
        path: String,
        /// Expected kind name
        expected: &'static str,
        /// Offending value
        value: String,
    },

    /// Malformed `key=value` override
    #[error("invalid override '{0}': expected dotted.path=value")]
    InvalidOverride(String),

    /// Value has the right type but is out of range
    #[error("field '{path}': {reason}")]
    InvalidValue {
        /// Dotted path
        path: String,
        /// Explanation
        reason: String,
    },

    /// Provider factory rejected the config
    #[error("provider error: {0}")]
    ProviderError(String),
}

/// Opaque credential bundle
///
/// The generic layer only checks presence and non-emptiness. Values never
/// appear in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Access {
    values: BTreeMap<String, String>,
}

impl Access {
    /// Build from key/value pairs
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    /// Credential value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Credential keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Whether no credentials are configured
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.values.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}

/// Window sizing and retry settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSettings {
    /// Window granularity
    pub granularity: Granularity,
    /// Attempts per window, including the first
    pub max_attempts: u32,
    /// Backoff base
    pub base_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
    /// Windows fetched ahead of the committed prefix (1 = sequential)
    pub parallel_windows: usize,
}

impl CrawlSettings {
    /// Defaults for a given granularity
    pub fn with_granularity(granularity: Granularity) -> Self {
        Self {
            granularity,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
            max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
            parallel_windows: 1,
        }
    }
}

/// Request budget for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitSettings {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Sliding window length
    pub window: Duration,
    /// In-flight ceiling
    pub max_concurrent: u32,
}

impl RateLimitSettings {
    /// Create settings
    pub const fn new(max_requests: u32, window: Duration, max_concurrent: u32) -> Self {
        Self {
            max_requests,
            window,
            max_concurrent,
        }
    }
}

/// Per-source defaults supplied at registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceDefaults {
    /// Default window granularity
    pub granularity: Granularity,
    /// Default request budget
    pub rate_limit: RateLimitSettings,
}

/// Validated configuration of one data source
#[derive(Clone)]
pub struct SourceConfig {
    source_id: String,
    dst_dir_raw: PathBuf,
    access: Access,
    crawl: CrawlSettings,
    rate_limit: RateLimitSettings,
    document: Value,
}

// The raw document may hold credentials
impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("source_id", &self.source_id)
            .field("dst_dir_raw", &self.dst_dir_raw)
            .field("access", &self.access)
            .field("crawl", &self.crawl)
            .field("rate_limit", &self.rate_limit)
            .finish_non_exhaustive()
    }
}

impl SourceConfig {
    /// Build a typed config from a document that has passed the schema checks
    ///
    /// `required_access` lists the credential keys the source needs; each must
    /// be present, non-empty and not a template placeholder.
    pub fn from_document(
        source_id: &str,
        document: Value,
        defaults: &SourceDefaults,
        required_access: &[&str],
    ) -> Result<Self, ConfigError> {
        let dst_dir_raw = schema::lookup(&document, "paths.dst_dir_raw")
            .and_then(schema::as_string)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ConfigError::MissingField {
                source_id: source_id.to_string(),
                path: "paths.dst_dir_raw".to_string(),
            })?;

        let access = read_access(source_id, &document, required_access)?;

        let granularity = match schema::lookup(&document, "crawl.granularity") {
            Some(v) => {
                let raw = schema::as_string(v).unwrap_or_default();
                raw.parse::<Granularity>()
                    .map_err(|_| ConfigError::TypeCoercion {
                        path: "crawl.granularity".to_string(),
                        expected: FieldKind::Granularity.name(),
                        value: raw,
                    })?
            }
            None => defaults.granularity,
        };

        let crawl = CrawlSettings {
            granularity,
            max_attempts: read_u32(&document, "crawl.max_attempts")?
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            base_backoff: Duration::from_millis(
                read_u64(&document, "crawl.base_backoff_ms")?.unwrap_or(DEFAULT_BASE_BACKOFF_MS),
            ),
            max_backoff: Duration::from_millis(
                read_u64(&document, "crawl.max_backoff_ms")?.unwrap_or(DEFAULT_MAX_BACKOFF_MS),
            ),
            parallel_windows: read_u64(&document, "crawl.parallel_windows")?
                .map(|n| narrow(n, "crawl.parallel_windows"))
                .transpose()?
                .unwrap_or(1),
        };

        let rate_limit = RateLimitSettings {
            max_requests: read_u32(&document, "rate_limit.max_requests")?
                .unwrap_or(defaults.rate_limit.max_requests),
            window: read_u64(&document, "rate_limit.window_secs")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit.window),
            max_concurrent: read_u32(&document, "rate_limit.max_concurrent")?
                .unwrap_or(defaults.rate_limit.max_concurrent),
        };

        let config = Self {
            source_id: source_id.to_string(),
            dst_dir_raw,
            access,
            crawl,
            rate_limit,
            document,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |path: &str, reason: &str| ConfigError::InvalidValue {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if self.crawl.max_attempts == 0 {
            return Err(invalid("crawl.max_attempts", "must be at least 1"));
        }
        if self.crawl.base_backoff > self.crawl.max_backoff {
            return Err(invalid(
                "crawl.base_backoff_ms",
                "must not exceed crawl.max_backoff_ms",
            ));
        }
        if self.crawl.parallel_windows == 0 || self.crawl.parallel_windows > MAX_PARALLEL_WINDOWS {
            return Err(ConfigError::InvalidValue {
                path: "crawl.parallel_windows".to_string(),
                reason: format!("must be between 1 and {MAX_PARALLEL_WINDOWS}"),
            });
        }
        if self.rate_limit.max_requests == 0 {
            return Err(invalid("rate_limit.max_requests", "must be at least 1"));
        }
        if self.rate_limit.window.is_zero() {
            return Err(invalid("rate_limit.window_secs", "must be at least 1"));
        }
        if self.rate_limit.max_concurrent == 0 {
            return Err(invalid("rate_limit.max_concurrent", "must be at least 1"));
        }
        Ok(())
    }

    /// Source identifier
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Raw output root
    pub fn dst_dir_raw(&self) -> &Path {
        &self.dst_dir_raw
    }

    /// Credentials
    pub fn access(&self) -> &Access {
        &self.access
    }

    /// Window and retry settings
    pub fn crawl(&self) -> &CrawlSettings {
        &self.crawl
    }

    /// Request budget
    pub fn rate_limit(&self) -> &RateLimitSettings {
        &self.rate_limit
    }

    /// Provider-specific value at a dotted path
    pub fn extra(&self, path: &str) -> Option<&Value> {
        schema::lookup(&self.document, path)
    }

    /// Provider-specific string
    pub fn extra_string(&self, path: &str) -> Option<String> {
        self.extra(path).and_then(schema::as_string)
    }

    /// Provider-specific string list; missing is an empty list
    pub fn extra_string_list(&self, path: &str) -> Result<Vec<String>, ConfigError> {
        match self.extra(path) {
            None => Ok(Vec::new()),
            Some(v) => schema::as_string_list(v).ok_or_else(|| ConfigError::TypeCoercion {
                path: path.to_string(),
                expected: FieldKind::StringList.name(),
                value: format!("{v:?}"),
            }),
        }
    }
}

fn read_u64(document: &Value, path: &str) -> Result<Option<u64>, ConfigError> {
    match schema::lookup(document, path) {
        None => Ok(None),
        Some(v) => schema::as_u64(v)
            .map(Some)
            .ok_or_else(|| ConfigError::TypeCoercion {
                path: path.to_string(),
                expected: FieldKind::Integer.name(),
                value: schema::as_string(v).unwrap_or_else(|| format!("{v:?}")),
            }),
    }
}

fn read_u32(document: &Value, path: &str) -> Result<Option<u32>, ConfigError> {
    read_u64(document, path)?
        .map(|n| narrow(n, path))
        .transpose()
}

/// Narrow a config integer, rejecting values the target type cannot hold
pub(crate) fn narrow<T: TryFrom<u64>>(n: u64, path: &str) -> Result<T, ConfigError> {
    T::try_from(n).map_err(|_| ConfigError::InvalidValue {
        path: path.to_string(),
        reason: format!("{n} is out of range"),
    })
}

fn read_access(
    source_id: &str,
    document: &Value,
    required: &[&str],
) -> Result<Access, ConfigError> {
    let mut values = BTreeMap::new();
    if let Some(section) = schema::lookup(document, "access") {
        let map = section.as_mapping().ok_or_else(|| ConfigError::InvalidValue {
            path: "access".to_string(),
            reason: "must be a mapping".to_string(),
        })?;
        for (key, value) in map {
            let (Some(key), Some(value)) = (key.as_str(), schema::as_string(value)) else {
                continue;
            };
            values.insert(key.to_string(), value);
        }
    }

    for key in required {
        let path = format!("access.{key}");
        match values.get(*key) {
            Some(v) if !v.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::MissingField {
                    source_id: source_id.to_string(),
                    path,
                })
            }
        }
    }

    for (key, value) in &values {
        if ACCESS_PLACEHOLDERS.iter().any(|p| value.contains(p)) {
            return Err(ConfigError::InvalidValue {
                path: format!("access.{key}"),
                reason: "still contains a template placeholder".to_string(),
            });
        }
    }

    Ok(Access::new(values))
}
