//! ENTSO-E Transparency Platform provider
//!
//! Fetches raw XML market documents from the RESTful API, one stream per
//! bidding zone (EIC code). The default query is actual generation per
//! production unit (`A73`/`A16`), which the platform serves one day at a time.
//!
//! The platform answers "no data for this period" with an acknowledgement
//! document instead of an empty time series; that reply is stored like any
//! other payload so the window is committed and never re-queried.

use super::failure::{AttemptFailure, AttemptOutcome, FailureKind, FetchedPayload};
use super::http::HttpFetcher;
use super::Provider;
use crate::config::{
    ConfigError, FieldKind, FieldSpec, RateLimitSettings, SourceConfig, SourceDefaults,
};
use crate::{FetchWindow, Granularity};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Source identifier
pub const SOURCE_ID: &str = "entsoe";

/// Production API endpoint
pub const DEFAULT_BASE_URL: &str = "https://web-api.tp.entsoe.eu/api";

/// Request timeout (seconds)
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Reason text of an acknowledgement that means "empty period"
const NO_DATA_REASON: &str = "No matching data found";

/// Provider-specific fields
pub const FIELDS: &[FieldSpec] = &[
    FieldSpec::required("access.api_key", FieldKind::String),
    FieldSpec::required("entsoe.bidding_zones", FieldKind::StringList),
    FieldSpec::optional("entsoe.document_type", FieldKind::String),
    FieldSpec::optional("entsoe.process_type", FieldKind::String),
    FieldSpec::optional("entsoe.base_url", FieldKind::String),
];

/// Registration defaults: the platform allows 400 requests per minute
pub const DEFAULTS: SourceDefaults = SourceDefaults {
    granularity: Granularity::Daily,
    rate_limit: RateLimitSettings::new(400, Duration::from_secs(60), 4),
};

/// ENTSO-E REST provider
pub struct EntsoeProvider {
    http: HttpFetcher,
    token: String,
    bidding_zones: Vec<String>,
    document_type: String,
    process_type: String,
}

impl EntsoeProvider {
    /// Build from a resolved config
    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        let token = config
            .access()
            .get("api_key")
            .ok_or_else(|| ConfigError::MissingField {
                source_id: SOURCE_ID.to_string(),
                path: "access.api_key".to_string(),
            })?
            .to_string();

        let bidding_zones = config.extra_string_list("entsoe.bidding_zones")?;
        if bidding_zones.is_empty() {
            return Err(ConfigError::MissingField {
                source_id: SOURCE_ID.to_string(),
                path: "entsoe.bidding_zones".to_string(),
            });
        }
        for zone in &bidding_zones {
            if !is_eic_code(zone) {
                return Err(ConfigError::InvalidValue {
                    path: "entsoe.bidding_zones".to_string(),
                    reason: format!("'{zone}' is not a 16-character EIC code"),
                });
            }
        }

        let base_url = config
            .extra_string("entsoe.base_url")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        info!(
            zones = bidding_zones.len(),
            base_url = %base_url,
            "ENTSO-E provider initialised"
        );

        Ok(Self {
            http: HttpFetcher::new(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))?,
            token,
            bidding_zones,
            document_type: config
                .extra_string("entsoe.document_type")
                .unwrap_or_else(|| "A73".to_string()),
            process_type: config
                .extra_string("entsoe.process_type")
                .unwrap_or_else(|| "A16".to_string()),
        })
    }

    fn query(&self, zone: &str, window: &FetchWindow) -> Vec<(&'static str, String)> {
        vec![
            ("securityToken", self.token.clone()),
            ("documentType", self.document_type.clone()),
            ("processType", self.process_type.clone()),
            ("in_Domain", zone.to_string()),
            ("periodStart", window.start.format("%Y%m%d%H%M").to_string()),
            ("periodEnd", window.end.format("%Y%m%d%H%M").to_string()),
        ]
    }
}

/// EIC codes are 16 characters of uppercase letters, digits and '-'
fn is_eic_code(code: &str) -> bool {
    code.len() == 16
        && code
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-')
}

/// Reason text of an acknowledgement document, if the body is one
pub fn acknowledgement_reason(body: &str) -> Option<String> {
    if !body.contains("Acknowledgement_MarketDocument") {
        return None;
    }
    let reason = body
        .split_once("<text>")
        .and_then(|(_, rest)| rest.split_once("</text>"))
        .map(|(text, _)| text.trim().to_string())
        .unwrap_or_default();
    Some(reason)
}

#[async_trait]
impl Provider for EntsoeProvider {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn streams(&self) -> Vec<String> {
        self.bidding_zones.clone()
    }

    async fn fetch(&self, stream: Option<&str>, window: &FetchWindow) -> AttemptOutcome {
        let Some(zone) = stream else {
            return Err(AttemptFailure::new(
                FailureKind::ConfigError,
                "ENTSO-E requests need a bidding zone",
            ));
        };

        let response = self.http.get("", &self.query(zone, window)).await?;

        let is_ack_status =
            response.status == StatusCode::OK || response.status == StatusCode::BAD_REQUEST;
        if is_ack_status {
            let body = String::from_utf8_lossy(&response.body).into_owned();
            if let Some(reason) = acknowledgement_reason(&body) {
                if reason.contains(NO_DATA_REASON) {
                    debug!(zone, window = %window, "No data for period");
                    return Ok(FetchedPayload {
                        bytes: response.body,
                        content_type: Some("application/xml".to_string()),
                        etag: None,
                    });
                }
                return Err(AttemptFailure::new(
                    FailureKind::MalformedRequest,
                    format!("request rejected: {reason}"),
                ));
            }
        }

        response.into_outcome()
    }

    fn validate(
        &self,
        _stream: Option<&str>,
        _window: &FetchWindow,
        payload: &FetchedPayload,
    ) -> Result<(), String> {
        let body = std::str::from_utf8(&payload.bytes)
            .map_err(|e| format!("response is not UTF-8 XML: {e}"))?;
        if !body.trim_start().starts_with('<') {
            return Err("response is not an XML document".to_string());
        }
        if body.contains("GL_MarketDocument") {
            return Ok(());
        }
        match acknowledgement_reason(body) {
            Some(reason) if reason.contains(NO_DATA_REASON) => Ok(()),
            Some(reason) => Err(format!("unexpected acknowledgement: {reason}")),
            None => Err("response has no GL_MarketDocument root".to_string()),
        }
    }

    fn artifact_extension(&self) -> &str {
        "xml"
    }

    fn describe_request(&self, stream: Option<&str>, window: &FetchWindow) -> String {
        format!(
            "GET {}?documentType={}&processType={}&in_Domain={}&periodStart={}&periodEnd={}",
            self.http.base_url(),
            self.document_type,
            self.process_type,
            stream.unwrap_or("?"),
            window.start.format("%Y%m%d%H%M"),
            window.end.format("%Y%m%d%H%M"),
        )
    }
}

/// Registry factory
pub fn create(config: &SourceConfig) -> Result<Arc<dyn Provider>, ConfigError> {
    Ok(Arc::new(EntsoeProvider::from_config(config)?))
}
