//! Outbound request pacing for remote sinks
//!
//! A single token bucket per sink, sized from `http.requests_per_second`.

use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Governor};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DirectLimiter = Governor<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>;

/// Pacing for one sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    /// Sustained requests per second; fractions allowed
    pub requests_per_second: f64,
    /// Requests that may go out back to back before pacing kicks in
    pub burst_size: u32,
}

impl RateLimiterConfig {
    /// Pacing with an explicit burst
    pub fn new(requests_per_second: f64, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
        }
    }

    /// Pacing whose burst equals one second of traffic, at least one request
    pub fn per_second(requests_per_second: f64) -> Self {
        let burst = if requests_per_second.is_finite() {
            requests_per_second.ceil().clamp(1.0, f64::from(u32::MAX))
        } else {
            1.0
        };
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self::new(requests_per_second, burst as u32)
    }

    // Non-positive or non-finite rates degrade to one request per second.
    fn quota(&self) -> Quota {
        let rps = if self.requests_per_second.is_finite() && self.requests_per_second > 0.0 {
            self.requests_per_second
        } else {
            1.0
        };
        let burst = NonZeroU32::new(self.burst_size).unwrap_or(NonZeroU32::MIN);
        Quota::with_period(Duration::from_secs_f64(1.0 / rps))
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}

/// Token bucket shared by every attempt of a sink's client
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            bucket: Arc::new(Governor::direct(config.quota())),
            config,
        }
    }

    /// Block until the next request may be sent
    pub async fn wait(&self) {
        self.bucket.until_ready().await;
    }

    /// Take a token without waiting
    pub fn try_acquire(&self) -> bool {
        self.bucket.check().is_ok()
    }

    pub fn config(&self) -> RateLimiterConfig {
        self.config
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("requests_per_second", &self.config.requests_per_second)
            .field("burst_size", &self.config.burst_size)
            .finish()
    }
}

#[cfg(test)]
mod rate_limit_tests {
    use super::*;

    #[test]
    fn test_burst_covers_one_second() {
        assert_eq!(RateLimiterConfig::per_second(2.5).burst_size, 3);
        assert_eq!(RateLimiterConfig::per_second(0.2).burst_size, 1);
        assert_eq!(RateLimiterConfig::per_second(f64::NAN).burst_size, 1);
    }

    #[tokio::test]
    async fn test_burst_then_throttled() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(10.0, 4));
        for _ in 0..4 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_slow_sink_allows_one_request() {
        let limiter = RateLimiter::new(RateLimiterConfig::per_second(0.5));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[tokio::test]
    async fn test_zero_rate_still_sends() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(0.0, 0));
        limiter.wait().await;
        assert_eq!(limiter.config().burst_size, 0);
    }
}
