//! Failure taxonomy shared by every provider.
//!
//! Providers translate their HTTP or SDK errors into an [`AttemptFailure`]
//! tagged with a [`FailureKind`]; the retry policy and the crawl report only
//! ever look at the kind, never at provider-specific error types.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Error as ReqwestError, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network timeout, connection reset, 5xx
    Transient,
    /// HTTP 429 or provider-signalled throttling
    RateLimited,
    /// HTTP 401/403 or rejected credentials
    AuthFailure,
    /// Other 4xx: the request itself is wrong
    MalformedRequest,
    /// 200 response whose payload fails shape checks
    ValidationFailure,
    /// Bad or missing configuration
    ConfigError,
    /// External shutdown signal
    Cancelled,
}

impl FailureKind {
    /// Short description used in log lines and reports
    pub fn description(&self) -> &'static str {
        match self {
            Self::Transient => "transient network or server error",
            Self::RateLimited => "rate limit exceeded",
            Self::AuthFailure => "authentication failed",
            Self::MalformedRequest => "malformed request",
            Self::ValidationFailure => "payload validation failed",
            Self::ConfigError => "configuration error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Suggested remediation shown after a crawl fails
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Transient => "Check network connectivity or provider status and re-run to resume",
            Self::RateLimited => "Lower rate_limit.max_requests or raise rate_limit.window_secs",
            Self::AuthFailure => "Verify the credentials in the access section of the source config",
            Self::MalformedRequest => "Check provider-specific parameters and the requested date range",
            Self::ValidationFailure => "Inspect the provider response; the window will be re-fetched on resume",
            Self::ConfigError => "Fix the source config file or -o overrides",
            Self::Cancelled => "Re-run the same command to resume from the last checkpoint",
        }
    }

    /// Whether the retry policy may try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }

    /// Classify a non-success HTTP status; `None` for 2xx/3xx
    pub fn from_status(status: StatusCode) -> Option<Self> {
        match status.as_u16() {
            401 | 403 => Some(Self::AuthFailure),
            408 => Some(Self::Transient),
            429 => Some(Self::RateLimited),
            _ if status.is_server_error() => Some(Self::Transient),
            _ if status.is_client_error() => Some(Self::MalformedRequest),
            _ => None,
        }
    }

    /// Classify a transport-level reqwest error
    pub fn from_transport(err: &ReqwestError) -> Self {
        if let Some(status) = err.status() {
            if let Some(kind) = Self::from_status(status) {
                return kind;
            }
        }
        if err.is_builder() {
            return Self::MalformedRequest;
        }
        // timeouts, refused connections, resets, truncated bodies
        Self::Transient
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::AuthFailure => "auth_failure",
            Self::MalformedRequest => "malformed_request",
            Self::ValidationFailure => "validation_failure",
            Self::ConfigError => "config_error",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure {
    /// Classification
    pub kind: FailureKind,
    /// Underlying cause
    pub message: String,
    /// Provider-supplied retry-after hint
    pub retry_after: Option<Duration>,
}

impl AttemptFailure {
    /// Failure of the given kind
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Attach a retry-after hint
    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Transient failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    /// Validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ValidationFailure, message)
    }

    /// Cancellation observed while the attempt was in flight
    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "shutdown requested")
    }

    /// Build from a transport error
    pub fn from_reqwest(err: &ReqwestError) -> Self {
        Self::new(FailureKind::from_transport(err), err.to_string())
    }
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.description(), self.message)
    }
}

/// Raw response body of a successful attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPayload {
    /// Body bytes, stored verbatim
    pub bytes: Bytes,
    /// `Content-Type` header, if any
    pub content_type: Option<String>,
    /// `ETag` header, if any
    pub etag: Option<String>,
}

impl FetchedPayload {
    /// Payload without response metadata
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
            etag: None,
        }
    }
}

/// Result of one provider call
pub type AttemptOutcome = Result<FetchedPayload, AttemptFailure>;

/// Parse a `Retry-After` header given as delta-seconds or an HTTP date
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}
