//! Provider implementations
//!
//! # Overview
//!
//! A [`Provider`] turns one [`FetchWindow`] of one stream into raw bytes. It
//! performs the network call and nothing else: checkpointing, retries, rate
//! limiting and persistence all belong to the crawl engine.
//!
//! Shipped providers:
//!
//! - [`entsoe`] - ENTSO-E Transparency Platform, one stream per bidding zone
//! - [`icon_dream_global`] - DWD ICON-DREAM-Global reanalysis, one stream per variable
//! - [`demo`] - offline synthetic data for smoke runs

use crate::FetchWindow;
use async_trait::async_trait;

pub mod demo;
pub mod entsoe;
pub mod failure;
pub mod http;
pub mod icon_dream_global;

pub use failure::{AttemptFailure, AttemptOutcome, FailureKind, FetchedPayload};

/// Stream keys of a provider; `[None]` for single-stream sources
pub fn stream_keys(provider: &dyn Provider) -> Vec<Option<String>> {
    let streams = provider.streams();
    if streams.is_empty() {
        vec![None]
    } else {
        streams.into_iter().map(Some).collect()
    }
}

/// Per-source fetch implementation
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registered source identifier
    fn source_id(&self) -> &str;

    /// Independent sub-streams, each with its own checkpoint
    ///
    /// An empty list means the source has a single unnamed stream, and
    /// `fetch` is called with `stream = None`.
    fn streams(&self) -> Vec<String> {
        Vec::new()
    }

    /// Fetch one window
    ///
    /// Must not write checkpoints or artifacts, and must map every error into
    /// an [`AttemptFailure`].
    async fn fetch(&self, stream: Option<&str>, window: &FetchWindow) -> AttemptOutcome;

    /// Check payload shape after a successful fetch
    ///
    /// A rejected payload is a non-retryable `ValidationFailure` for the window.
    fn validate(
        &self,
        _stream: Option<&str>,
        _window: &FetchWindow,
        payload: &FetchedPayload,
    ) -> Result<(), String> {
        if payload.bytes.is_empty() {
            return Err("empty payload".to_string());
        }
        Ok(())
    }

    /// File extension of stored artifacts (without the dot)
    fn artifact_extension(&self) -> &str;

    /// Human-readable request target for dry-run logs
    fn describe_request(&self, stream: Option<&str>, window: &FetchWindow) -> String {
        match stream {
            Some(stream) => format!("{} {} {}", self.source_id(), stream, window),
            None => format!("{} {}", self.source_id(), window),
        }
    }
}
