//! Shared token bucket
//!
//! One [`RateLimiter`] exists per upstream. Every partition task holds a
//! clone, and clones draw from the same governor bucket.

use crate::config::RateLimitConfig;
use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

type Bucket = Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Token bucket limiting requests to one upstream
#[derive(Clone)]
pub struct RateLimiter {
    bucket: Arc<Bucket>,
    requests_per_second: NonZeroU32,
    burst: NonZeroU32,
}

impl RateLimiter {
    /// Build a bucket from source or settings configuration
    ///
    /// Zero values are raised to one request.
    pub fn new(config: &RateLimitConfig) -> Self {
        let requests_per_second =
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN);

        Self {
            bucket: Arc::new(Governor::direct(
                Quota::per_second(requests_per_second).allow_burst(burst),
            )),
            requests_per_second,
            burst,
        }
    }

    /// Wait for a permit; returns how long the caller was held back
    pub async fn acquire(&self) -> Duration {
        let start = Instant::now();
        self.bucket.until_ready().await;
        let waited = start.elapsed();
        if !waited.is_zero() {
            trace!(waited_ms = waited.as_millis() as u64, "rate limiter delayed request");
        }
        waited
    }

    /// Take a permit if one is available right now
    pub fn try_acquire(&self) -> bool {
        self.bucket.check().is_ok()
    }

    /// Sustained rate
    pub fn requests_per_second(&self) -> u32 {
        self.requests_per_second.get()
    }

    /// Bucket size
    pub fn burst(&self) -> u32 {
        self.burst.get()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("requests_per_second", &self.requests_per_second)
            .field("burst", &self.burst)
            .finish_non_exhaustive()
    }
}
