//! Shared retry-with-backoff policy for store and provider calls
//!
//! One policy object is shared by the repository, the search engine, and
//! the extraction pipeline instead of each caller rolling its own loop.
//! Only retryable errors (see [`Error::is_retryable`]) consume retry
//! budget; deterministic failures return immediately.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry budget and backoff schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay_ms: u64,

    /// Ceiling on any single delay
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each attempt
    pub backoff_multiplier: f64,

    /// Deadline applied to each individual attempt
    pub attempt_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries (single attempt)
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Builder: set the attempt budget
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Builder: set the per-attempt timeout
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout_ms = timeout.as_millis() as u64;
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((raw as u64).min(self.max_delay_ms))
    }

    /// Run an operation under this policy
    ///
    /// Each attempt is bounded by the per-attempt timeout; a timeout is a
    /// retryable failure like any other, up to the budget.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = Error::Internal(format!("{label}: no attempts made"));

        for attempt in 0..self.max_attempts {
            let outcome =
                match tokio::time::timeout(Duration::from_millis(self.attempt_timeout_ms), op())
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout(self.attempt_timeout_ms)),
                };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {}ms: {}",
                        label,
                        attempt + 1,
                        self.max_attempts,
                        delay.as_millis(),
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error)
    }
}
