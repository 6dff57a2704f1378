//! DWD ICON-DREAM-Global reanalysis provider
//!
//! The DWD open-data portal publishes one hourly GRIB file per variable and
//! month. No credentials are needed. Each configured variable is a stream.
//! Only monthly windows are served: a window that is not exactly one calendar
//! month fails as a malformed request before anything is downloaded.

use super::failure::{AttemptFailure, AttemptOutcome, FailureKind, FetchedPayload};
use super::http::HttpFetcher;
use super::Provider;
use crate::config::{
    ConfigError, FieldKind, FieldSpec, RateLimitSettings, SourceConfig, SourceDefaults,
};
use crate::{FetchWindow, Granularity};
use async_trait::async_trait;
use chrono::{Datelike, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Source identifier
pub const SOURCE_ID: &str = "icon_dream_global";

/// Open-data directory for hourly fields
pub const DEFAULT_BASE_URL: &str =
    "https://opendata.dwd.de/climate_environment/REA/ICON-DREAM-Global/hourly";

/// Monthly files run to several GB
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Variables published on the portal
pub const KNOWN_VARIABLES: &[&str] = &[
    // pressure levels
    "T", "U", "V", "W", "P", "QV", "TKE", "WS", "DEN",
    // surface
    "T_2M", "U_10M", "V_10M", "TD_2M", "TOT_PREC", "PS", "PMSL", "CLCT", "ASWDIR_S",
    "ASWDIFD_S", "QV_S", "TMAX_2M", "TMIN_2M", "VMAX_10M", "WS_10M", "Z0",
];

/// Provider-specific fields
pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::optional("icon_dream_global.variables", FieldKind::StringList),
    FieldSpec::optional("icon_dream_global.base_url", FieldKind::String),
];

/// Registration defaults
pub const DEFAULTS: SourceDefaults = SourceDefaults {
    granularity: Granularity::Monthly,
    rate_limit: RateLimitSettings::new(30, Duration::from_secs(60), 2),
};

/// DWD open-data provider
pub struct IconDreamGlobalProvider {
    http: HttpFetcher,
    variables: Vec<String>,
}

impl IconDreamGlobalProvider {
    /// Build from a resolved config; defaults to temperature (`T`)
    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        let mut variables = config.extra_string_list("icon_dream_global.variables")?;
        if variables.is_empty() {
            variables.push("T".to_string());
        }

        let unknown: Vec<&str> = variables
            .iter()
            .map(String::as_str)
            .filter(|v| !KNOWN_VARIABLES.contains(v))
            .collect();
        if !unknown.is_empty() {
            return Err(ConfigError::InvalidValue {
                path: "icon_dream_global.variables".to_string(),
                reason: format!(
                    "unknown variables {}; available: {}",
                    unknown.join(", "),
                    KNOWN_VARIABLES.join(", ")
                ),
            });
        }

        if config.crawl().granularity != Granularity::Monthly {
            return Err(ConfigError::InvalidValue {
                path: "crawl.granularity".to_string(),
                reason: format!(
                    "{SOURCE_ID} publishes one file per month; got {}, expected monthly",
                    config.crawl().granularity
                ),
            });
        }

        let base_url = config
            .extra_string("icon_dream_global.base_url")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        info!(variables = ?variables, base_url = %base_url, "ICON-DREAM provider initialised");

        Ok(Self {
            http: HttpFetcher::new(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))?,
            variables,
        })
    }

    /// Path of the monthly file below the base URL
    pub fn file_path(variable: &str, window: &FetchWindow) -> String {
        format!(
            "{variable}/ICON-DREAM-Global_{}_{variable}_hourly.grb",
            window.start.format("%Y%m")
        )
    }

    /// True when `window` is exactly one calendar month
    pub fn is_whole_month(window: &FetchWindow) -> bool {
        let start = window.start;
        start.day() == 1
            && start.num_seconds_from_midnight() == 0
            && start.nanosecond() == 0
            && Granularity::Monthly.next_boundary(start) == Some(window.end)
    }
}

#[async_trait]
impl Provider for IconDreamGlobalProvider {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn streams(&self) -> Vec<String> {
        self.variables.clone()
    }

    async fn fetch(&self, stream: Option<&str>, window: &FetchWindow) -> AttemptOutcome {
        if !Self::is_whole_month(window) {
            return Err(AttemptFailure::new(
                FailureKind::MalformedRequest,
                format!(
                    "window {window} is not a whole calendar month; align --start and --end to the first of a month"
                ),
            ));
        }
        let variable = stream.unwrap_or("T");
        let response = self
            .http
            .get(&Self::file_path(variable, window), &[])
            .await?;
        response.into_outcome()
    }

    fn validate(
        &self,
        _stream: Option<&str>,
        _window: &FetchWindow,
        payload: &FetchedPayload,
    ) -> Result<(), String> {
        let bytes = &payload.bytes[..];
        if !bytes.starts_with(b"GRIB") {
            return Err("missing GRIB header".to_string());
        }
        if !bytes.ends_with(b"7777") {
            return Err("truncated GRIB file (no end marker)".to_string());
        }
        Ok(())
    }

    fn artifact_extension(&self) -> &str {
        "grb"
    }

    fn describe_request(&self, stream: Option<&str>, window: &FetchWindow) -> String {
        format!(
            "GET {}/{}",
            self.http.base_url(),
            Self::file_path(stream.unwrap_or("T"), window)
        )
    }
}

/// Registry factory
pub fn create(config: &SourceConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    Ok(Arc::new(IconDreamGlobalProvider::from_config(config)?))
}
