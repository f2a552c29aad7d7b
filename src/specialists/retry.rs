//! Per-call retry policy for rate-limit class errors
//!
//! Retries apply to one provider within one dispatch attempt. The breaker only
//! sees the final outcome.

use crate::error::ProviderError;
use std::future::Future;
use std::time::Duration;

/// Default total attempts per provider call
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;
/// Default base backoff in milliseconds (doubles each retry: 1s, 2s, 4s)
pub const DEFAULT_BASE_BACKOFF_MS: u64 = 1000;
/// Maximum backoff duration in milliseconds (30 seconds)
///
/// Prevents infinite sleep from exponential overflow.
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Retry settings for one provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts (must be at least 1)
    max_attempts: usize,
    /// Base backoff in milliseconds (doubles each retry)
    base_backoff_ms: u64,
}

impl RetryPolicy {
    /// Create a new retry policy
    ///
    /// # Errors
    /// Returns an error if `max_attempts` is 0 (at least 1 attempt is required)
    pub fn new(max_attempts: usize, base_backoff_ms: u64) -> Result<Self, &'static str> {
        if max_attempts == 0 {
            return Err("max_attempts must be at least 1");
        }
        Ok(Self {
            max_attempts,
            base_backoff_ms,
        })
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn base_backoff_ms(&self) -> u64 {
        self.base_backoff_ms
    }

    /// Delay after failed attempt number `attempt` (1-indexed)
    ///
    /// `base * 2^(attempt-1)`, capped at [`MAX_BACKOFF_MS`].
    pub fn backoff(&self, attempt: usize) -> Duration {
        let exponent = (attempt as u32).saturating_sub(1);
        let ms = self
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(MAX_BACKOFF_MS);
        Duration::from_millis(ms)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempts are exhausted
    ///
    /// Every attempt is bounded by `timeout`; an elapsed timeout counts as a
    /// retryable `ProviderError::Timeout`. Backoff sleeps are ordinary tokio
    /// sleeps, so dropping the returned future cancels the whole sequence.
    pub async fn run<T, F, Fut>(
        &self,
        provider: &str,
        timeout: Duration,
        mut op: F,
    ) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_elapsed) => Err(ProviderError::Timeout {
                    provider: provider.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        provider = %provider,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable provider error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::debug!(
                        provider = %provider,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        retryable = e.is_retryable(),
                        error = %e,
                        "Provider call failed, not retrying"
                    );
                    return Err(e);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
        }
    }
}

impl TryFrom<&crate::config::RetryConfig> for RetryPolicy {
    type Error = &'static str;

    fn try_from(config: &crate::config::RetryConfig) -> Result<Self, Self::Error> {
        Self::new(config.max_attempts, config.base_backoff_ms)
    }
}
