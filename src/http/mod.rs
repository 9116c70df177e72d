//! HTTP client module
//!
//! Transport for the remote sinks: retries with backoff, a token-bucket rate
//! limiter, and authentication applied per attempt.

mod client;
mod rate_limit;

pub use client::{BackoffType, HttpClient, HttpClientConfig, JsonRequest, RetryPolicy};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
