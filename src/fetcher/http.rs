//! Shared HTTP plumbing for provider implementations
//!
//! Every HTTP provider sends its requests through [`HttpFetcher`], which maps
//! transport errors and non-success statuses onto the shared
//! [`FailureKind`](super::FailureKind) taxonomy. Providers that need to
//! reinterpret a status (for example a 400 that actually means "no data")
//! inspect the [`RawResponse`] before calling [`RawResponse::into_outcome`].

use super::failure::{parse_retry_after, AttemptFailure, AttemptOutcome, FailureKind, FetchedPayload};
use crate::config::ConfigError;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, CONTENT_TYPE, ETAG};
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::debug;

/// HTTP connect timeout (seconds)
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Longest error body echoed into failure messages
const ERROR_SNIPPET_LEN: usize = 512;

/// Response received from a provider, before classification
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl RawResponse {
    /// Body as lossy UTF-8, truncated for log and error messages
    pub fn body_snippet(&self) -> String {
        let text = String::from_utf8_lossy(&self.body);
        let mut snippet: String = text.chars().take(ERROR_SNIPPET_LEN).collect();
        if text.chars().count() > ERROR_SNIPPET_LEN {
            snippet.push_str("...");
        }
        snippet
    }

    /// Map the status onto a failure kind or wrap the body as a payload
    pub fn into_outcome(self) -> AttemptOutcome {
        if let Some(kind) = FailureKind::from_status(self.status) {
            let retry_after = parse_retry_after(&self.headers);
            return Err(AttemptFailure::new(
                kind,
                format!("HTTP {}: {}", self.status, self.body_snippet()),
            )
            .with_retry_after(retry_after));
        }

        let header = |name: HeaderName| {
            self.headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Ok(FetchedPayload {
            content_type: header(CONTENT_TYPE),
            etag: header(ETAG),
            bytes: self.body,
        })
    }
}

/// GET client bound to one provider base URL
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base_url: String,
}

impl HttpFetcher {
    /// Build a client with connect and overall request timeouts
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
            .timeout(request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::ProviderError(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a GET request and read the full body
    ///
    /// Only transport failures are returned as `Err`; HTTP error statuses are
    /// left in the [`RawResponse`] for the caller to classify.
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<RawResponse, AttemptFailure> {
        let url = if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path.trim_start_matches('/'))
        };

        let started = Instant::now();
        debug!(url = %url, params = query.len(), "Sending GET request");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(&e))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| AttemptFailure::from_reqwest(&e))?;

        debug!(
            url = %url,
            status = status.as_u16(),
            bytes = body.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "GET request completed"
        );

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}
