//! # Configuration
//!
//! Settings for the rate limiter and the request queue, plus the defaults the
//! process-wide instances are built from.
//!
//! ## Token Bucket Parameters
//!
//! ```text
//!     ┌──────────────────────────────┐
//!     │   Burst Size (capacity)      │ ← instantaneous allowance
//!     │   ┌─────────────────────┐    │
//!     │   │ ● ● ● ● ● ● ● ●     │    │ ← fractional tokens
//!     │   └─────────────────────┘    │
//!     │                              │
//!     │   Requests/second: 8         │ ← continuous refill
//!     └──────────────────────────────┘
//! ```
//!
//! Unlike an interval-based bucket, refill here is continuous: every
//! observation credits `elapsed_ms × requests_per_second / 1000` tokens.

use super::error::ConfigError;
use std::time::Duration;

/// Documented backend cap the default limiter is sized against.
pub const BACKEND_REQUESTS_PER_MINUTE: u32 = 600;

/// Sustained rate of the process-wide default limiter.
///
/// 8/s is 480/min, safely below [`BACKEND_REQUESTS_PER_MINUTE`].
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 8;

/// Burst size of the process-wide default limiter.
pub const DEFAULT_BURST_SIZE: u32 = 15;

/// Default spacing between queue dispatches.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for a [`RateLimiter`](crate::RateLimiter).
///
/// # Examples
///
/// ```rust
/// use pacer::RateLimiterConfig;
///
/// // 10 requests/second, bursts of up to 20
/// let config = RateLimiterConfig::per_second(10);
/// assert_eq!(config.burst_size, 20);
///
/// // Explicit burst
/// let config = RateLimiterConfig::new(8, 15);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Sustained number of requests allowed per second.
    pub requests_per_second: u32,

    /// Maximum number of tokens the bucket can hold.
    ///
    /// This is how many requests may be made back to back before the
    /// sustained rate applies.
    pub burst_size: u32,
}

impl Default for RateLimiterConfig {
    /// 8 requests/second with bursts of 15.
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_SECOND, DEFAULT_BURST_SIZE)
    }
}

impl RateLimiterConfig {
    /// Creates a configuration with an explicit burst size.
    pub const fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            requests_per_second,
            burst_size,
        }
    }

    /// Creates a configuration with burst size `2 × requests_per_second`.
    pub const fn per_second(requests_per_second: u32) -> Self {
        Self::new(requests_per_second, requests_per_second.saturating_mul(2))
    }

    /// Creates a configuration from a per-minute quota.
    ///
    /// The sustained rate is rounded down to whole requests per second (at
    /// least one), so the result never exceeds the quota.
    ///
    /// ```rust
    /// use pacer::RateLimiterConfig;
    ///
    /// let config = RateLimiterConfig::per_minute(600);
    /// assert_eq!(config.requests_per_second, 10);
    /// ```
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::per_second((requests_per_minute / 60).max(1))
    }

    /// Overrides the burst size.
    pub fn with_burst_size(mut self, burst_size: u32) -> Self {
        self.burst_size = burst_size;
        self
    }

    /// Checks that both parameters are non-zero.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroRate`] or [`ConfigError::ZeroBurst`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_second == 0 {
            return Err(ConfigError::ZeroRate);
        }
        if self.burst_size == 0 {
            return Err(ConfigError::ZeroBurst);
        }
        Ok(())
    }

    /// Tokens regenerated per millisecond.
    #[inline]
    pub fn refill_rate_per_ms(&self) -> f64 {
        self.requests_per_second as f64 / 1000.0
    }

    /// Time for a single token to regenerate, rounded up to whole milliseconds.
    pub fn token_interval(&self) -> Duration {
        if self.requests_per_second == 0 {
            return Duration::MAX;
        }
        super::clock::ceil_ms(1000.0 / self.requests_per_second as f64)
    }
}

/// Configuration for a [`RequestQueue`](crate::RequestQueue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Minimum delay between the completion of one item and the start of the next.
    pub min_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_interval: DEFAULT_MIN_INTERVAL,
        }
    }
}

impl QueueConfig {
    /// Creates a queue configuration with the given spacing.
    pub const fn new(min_interval: Duration) -> Self {
        Self { min_interval }
    }

    /// Convenience constructor taking milliseconds.
    pub const fn from_millis(min_interval_ms: u64) -> Self {
        Self::new(Duration::from_millis(min_interval_ms))
    }
}
