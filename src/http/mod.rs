//! HTTP client module
//!
//! Provides the HTTP client, the shared rate limiter and the retry ladder.
//!
//! # Features
//!
//! - **Rate Limiting**: One token bucket per upstream, shared by all partitions
//! - **Retry Ladder**: Separate counters for rate limits and transient failures
//! - **Backoff Strategies**: Constant, linear, and exponential backoff
//! - **Error Classification**: 429, 401/403, 5xx and timeouts map onto sync error kinds

mod client;
mod rate_limit;
mod retry;

pub use client::{HttpClient, HttpClientConfig, Request};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
