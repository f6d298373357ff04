//! Retry policy with backoff
//!
//! Wraps any fallible async operation. Rate-limit signals and transient
//! failures are counted separately; each counter may reach `max_attempts`
//! retries before a terminal error is surfaced. Everything else returns
//! immediately.

use crate::error::{Error, ErrorKind, Result};
use crate::types::BackoffType;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy shared by every collaborator call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_type: BackoffType,
    initial_backoff: Duration,
    max_backoff: Duration,
    timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    /// Exponential backoff from 1s, capped at 60s, no per-call timeout
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_type: BackoffType::Exponential,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            timeout: None,
        }
    }

    /// Set backoff configuration
    #[must_use]
    pub fn with_backoff(mut self, backoff_type: BackoffType, initial: Duration, max: Duration) -> Self {
        self.backoff_type = backoff_type;
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Bound every attempt by a timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Retries allowed per counter
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Calculate backoff delay for a given attempt (0-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let delay = match self.backoff_type {
            BackoffType::Constant => self.initial_backoff,
            BackoffType::Linear => self.initial_backoff.saturating_mul(attempt + 1),
            BackoffType::Exponential => {
                let factor = 2u32.saturating_pow(attempt);
                self.initial_backoff.saturating_mul(factor)
            }
        };

        std::cmp::min(delay, self.max_backoff)
    }

    /// Delay after a rate-limit response
    ///
    /// `Retry-After` wins over the backoff ladder but is capped at `max_backoff`.
    pub fn rate_limit_delay(&self, retry_after_seconds: Option<u64>, attempt: u32) -> Duration {
        retry_after_seconds.map_or_else(
            || self.backoff_delay(attempt),
            |secs| std::cmp::min(Duration::from_secs(secs), self.max_backoff),
        )
    }

    /// Run `op` until it succeeds, fails terminally, or a counter runs out
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut rate_limited = 0u32;
        let mut transient = 0u32;

        loop {
            let err = match self.attempt(&mut op).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            match err.kind() {
                ErrorKind::RateLimited if err.is_retryable() => {
                    if rate_limited >= self.max_attempts {
                        warn!(operation, attempts = rate_limited, "rate limit retries exhausted");
                        return Err(Error::RateLimitExhausted {
                            attempts: rate_limited,
                        });
                    }
                    let delay = self.rate_limit_delay(err.retry_after_seconds(), rate_limited);
                    rate_limited += 1;
                    warn!(
                        operation,
                        attempt = rate_limited,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                ErrorKind::Transient if err.is_retryable() => {
                    if transient >= self.max_attempts {
                        warn!(operation, attempts = transient, error = %err, "retries exhausted");
                        return Err(Error::MaxRetriesExceeded {
                            max_retries: self.max_attempts,
                            last_error: err.to_string(),
                        });
                    }
                    let delay = self.backoff_delay(transient);
                    transient += 1;
                    warn!(
                        operation,
                        attempt = transient,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                _ => return Err(err),
            }
        }
    }

    async fn attempt<T, F, Fut>(&self, op: &mut F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                }),
            },
            None => op().await,
        }
    }
}
