//! Per-source request budget and in-flight ceiling
//!
//! Every admission takes one slot of the request budget and holds it for the
//! configured window, so no more than `max_requests` admissions complete in
//! any window-length interval. A second semaphore caps requests in flight;
//! its slot lives in the returned [`ScopedPermit`] and is released on drop,
//! whichever path the caller leaves by. Tokio semaphores queue waiters in
//! FIFO order, so a waiter is never starved.

use crate::config::RateLimitSettings;
use crate::shutdown::{self, SharedShutdown};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::trace;

/// Rate limiter shared by all windows of one source
#[derive(Debug, Clone)]
pub struct RateLimiter {
    budget: Arc<Semaphore>,
    in_flight: Arc<Semaphore>,
    window: Duration,
    settings: RateLimitSettings,
    shutdown: Option<SharedShutdown>,
}

/// Admission to issue one request
///
/// Holds an in-flight slot until dropped.
#[derive(Debug)]
pub struct ScopedPermit {
    _in_flight: OwnedSemaphorePermit,
    waited: Duration,
}

impl ScopedPermit {
    /// Time spent waiting for admission
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl RateLimiter {
    /// Create a limiter from source settings
    ///
    /// Zero limits are raised to one so the limiter cannot deadlock.
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            budget: Arc::new(Semaphore::new(settings.max_requests.max(1) as usize)),
            in_flight: Arc::new(Semaphore::new(settings.max_concurrent.max(1) as usize)),
            window: settings.window,
            settings,
            shutdown: None,
        }
    }

    /// Abort pending acquisitions when shutdown is requested
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Settings this limiter enforces
    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Request slots currently free in the budget
    pub fn available_requests(&self) -> usize {
        self.budget.available_permits()
    }

    /// Wait until one more request is allowed
    ///
    /// Fails only with [`RateLimitError::Cancelled`] once shutdown has been
    /// requested.
    pub async fn acquire(&self) -> Result<ScopedPermit, RateLimitError> {
        if self
            .shutdown
            .as_ref()
            .is_some_and(|s| s.is_shutdown_requested())
        {
            return Err(RateLimitError::Cancelled);
        }

        let started = Instant::now();
        tokio::select! {
            biased;
            _ = shutdown::wait_for(self.shutdown.as_ref()) => Err(RateLimitError::Cancelled),
            permit = self.admit() => {
                let mut permit = permit?;
                permit.waited = started.elapsed();
                trace!(
                    waited_ms = permit.waited.as_millis() as u64,
                    budget_left = self.budget.available_permits(),
                    "Rate limit permit acquired"
                );
                Ok(permit)
            }
        }
    }

    async fn admit(&self) -> Result<ScopedPermit, RateLimitError> {
        // In-flight slot first, so the budget slot's window starts when the
        // request can actually be sent
        let in_flight = self
            .in_flight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RateLimitError::Cancelled)?;

        let slot = self
            .budget
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RateLimitError::Cancelled)?;

        // Hold the budget slot for the window duration, then release it
        let window = self.window;
        tokio::spawn(async move {
            sleep(window).await;
            drop(slot);
        });

        Ok(ScopedPermit {
            _in_flight: in_flight,
            waited: Duration::ZERO,
        })
    }
}

/// Rate limiter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitError {
    /// Shutdown was requested while waiting
    #[error("rate limit acquisition cancelled by shutdown")]
    Cancelled,
}
