//! # Pacer - Client-side Request Traffic Governor
//!
//! Keeps an application from hammering its backend. Pacer sits between the
//! code that wants data and the code that fetches it, and shapes outbound
//! traffic with four independent primitives:
//!
//! - **Deduplication** - identical in-flight requests share one call
//! - **Throttle / Debounce** - limit how often a function runs
//! - **Request Queue** - one operation at a time, with spacing
//! - **Rate Limiter** - token bucket with sustained rate and burst cap
//!
//! ## Why?
//!
//! A dashboard that mounts ten widgets can easily fire ten copies of the
//! same request within a millisecond, then another burst when the user
//! switches tabs. The backend allows 600 requests per minute. Pacer makes
//! the client stay well under that without every call site reinventing
//! timers.
//!
//! ```text
//!     Without pacer:                      With pacer:
//!
//!     widget A ─► GET /sources            widget A ─┐
//!     widget B ─► GET /sources            widget B ─┼─► GET /sources (once)
//!     widget C ─► GET /sources            widget C ─┘
//!     ... 40 requests in 50ms             ... spaced, capped at 8/s
//! ```
//!
//! ## The Token Bucket
//!
//! ```text
//!     Token Bucket (8/s, burst 15):
//!
//!     t=0ms      [●●●●●●●●●●●●●●●] 15 tokens (starts full)
//!     15 reqs    [               ]  all approved, bucket empty
//!     16th req   [               ]  ⛔ rejected (or waits ~125ms)
//!     t=125ms    [●              ]  one token regenerated
//! ```
//!
//! Tokens are fractional and refill continuously: every check first credits
//! `elapsed_ms × requests_per_second / 1000` tokens, capped at the burst size.
//!
//! ## Quick Start
//!
//! ### Deduplicating requests
//!
//! ```rust
//! use pacer::Deduplicator;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let dedupe: Deduplicator<u32, String> = Deduplicator::new();
//!
//! let a = dedupe.dedupe("validations", || async { Ok(3) });
//! let b = dedupe.dedupe("validations", || async { Ok(99) }); // never runs
//!
//! assert_eq!(a.await, Ok(3));
//! assert_eq!(b.await, Ok(3));
//! # }
//! ```
//!
//! ### Rate limiting
//!
//! ```rust
//! use pacer::{RateLimiter, RateLimiterConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = RateLimiter::with_config(RateLimiterConfig::new(8, 15));
//!
//! if limiter.try_acquire() {
//!     println!("✅ send now");
//! } else {
//!     println!("⛔ retry in {:?}", limiter.wait_time());
//! }
//!
//! // Or simply wait for a token
//! limiter.acquire().await;
//! # }
//! ```
//!
//! ### Serializing requests
//!
//! ```rust
//! use pacer::{QueueError, RequestQueue};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let queue = RequestQueue::new(Duration::from_millis(100));
//!
//! let first = queue.add(|| async { Ok::<_, String>("page 1") });
//! let second = queue.add(|| async { Err::<&str, _>("503".to_string()) });
//!
//! assert_eq!(first.await, Ok("page 1"));
//! assert_eq!(second.await, Err(QueueError::Failed("503".to_string())));
//! # }
//! ```
//!
//! ### Process-wide instances
//!
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = pacer::defaults::request_limiter();
//! limiter.acquire().await;
//!
//! let queue = pacer::defaults::request_queue();
//! let status = queue.add(|| async { Ok::<_, ()>(200) }).await;
//! assert_eq!(status, Ok(200));
//! # }
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Your Application      │
//!                    └──────────┬──────────────┘
//!                               │
//!        ┌──────────────┬───────┴───────┬──────────────┐
//!        │              │               │              │
//!  ┌─────▼──────┐ ┌─────▼──────┐ ┌──────▼─────┐ ┌──────▼─────┐
//!  │Deduplicator│ │ Throttle / │ │  Request   │ │   Rate     │
//!  │            │ │ Debouncer  │ │  Queue     │ │  Limiter   │
//!  ├────────────┤ ├────────────┤ ├────────────┤ ├────────────┤
//!  │ DashMap of │ │ last-run   │ │ FIFO +     │ │ fractional │
//!  │ Shared     │ │ timestamp, │ │ drain task │ │ token      │
//!  │ futures    │ │ tokio task │ │ + spacing  │ │ bucket     │
//!  └────────────┘ └────────────┘ └────────────┘ └────────────┘
//!                               │
//!                    ┌──────────▼──────────────┐
//!                    │   Clock (tokio/manual)  │
//!                    └─────────────────────────┘
//! ```
//!
//! The primitives do not know about each other. Compose them in the order
//! the call site needs, typically dedupe → queue → limiter → network.
//!
//! ## Testing
//!
//! Everything that reads time goes through [`Clock`]. Use
//! `#[tokio::test(start_paused = true)]` with the default [`TokioClock`], or
//! inject a [`ManualClock`] and move time by hand.
//!
//! ## Thread Safety
//!
//! All types are `Send + Sync` and take `&self`:
//! - `RateLimiter` - share via `Arc<RateLimiter>`
//! - `RequestQueue` - cheap to clone, clones share the queue
//! - `Deduplicator` - share via `Arc<Deduplicator<..>>`

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod traffic;

// Public re-exports
pub use traffic::{
    defaults, tokio_clock, AcquireError, AsyncThrottle, Clock, ConfigError, DedupeStats,
    Debouncer, Deduplicator, HealthStatus, ManualClock, QueueConfig, QueueError, QueueStats,
    RateLimiter, RateLimiterConfig, RateLimiterMetrics, RequestQueue, SharedCall, SharedClock,
    SharedRequest, Throttle, TokioClock, BACKEND_REQUESTS_PER_MINUTE, DEFAULT_BURST_SIZE,
    DEFAULT_MIN_INTERVAL, DEFAULT_REQUESTS_PER_SECOND,
};

/// A rate limiter wrapped in `Arc` for convenient sharing.
///
/// # Example
/// ```rust
/// use pacer::{RateLimiter, SharedRateLimiter};
/// use std::sync::Arc;
///
/// let shared: SharedRateLimiter = Arc::new(RateLimiter::new(10));
///
/// let limiter = shared.clone();
/// std::thread::spawn(move || {
///     limiter.try_acquire();
/// });
/// ```
pub type SharedRateLimiter = std::sync::Arc<RateLimiter>;

/// A deduplicator wrapped in `Arc`, keyed by `String`.
pub type SharedDeduplicator<T, E> = std::sync::Arc<Deduplicator<T, E>>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
///
/// Needed for `std::pin::pin!` and `async fn` in inherent impls with
/// `impl Future` returns.
pub const MSRV: &str = "1.75.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use pacer::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical request-shaping code.
    //!
    //! # Example
    //! ```rust
    //! use pacer::prelude::*;
    //! use std::time::Duration;
    //!
    //! let limiter = RateLimiter::new(8);
    //! let config = RateLimiterConfig::per_minute(600);
    //! let throttle = Throttle::new(|n: u32| n + 1, Duration::from_secs(1));
    //! assert_eq!(throttle.call(1), Some(2));
    //! let status = HealthStatus::Healthy;
    //! ```

    pub use crate::{
        AcquireError, AsyncThrottle, Debouncer, Deduplicator, HealthStatus, QueueError,
        RateLimiter, RateLimiterBuilder, RateLimiterConfig, RateLimiterMetrics, RequestQueue,
        SharedRateLimiter, Throttle,
    };
}

/// Builder for rate limiters with custom settings.
///
/// # Example
///
/// ```rust
/// use pacer::{ConfigError, RateLimiterBuilder};
///
/// // Backend allows 600/min; stay at 8/s with bursts of 15.
/// let limiter = RateLimiterBuilder::new()
///     .requests_per_second(8)
///     .burst_size(15)
///     .build();
/// assert_eq!(limiter.available_tokens(), 15.0);
///
/// // Or use try_build() for error handling
/// let result = RateLimiterBuilder::new().burst_size(0).try_build();
/// assert_eq!(result.unwrap_err(), ConfigError::ZeroBurst);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiterBuilder {
    config: RateLimiterConfig,
    clock: Option<SharedClock>,
}

impl RateLimiterBuilder {
    /// Creates a builder with the default configuration (8/s, burst 15).
    pub fn new() -> Self {
        Self {
            config: RateLimiterConfig::default(),
            clock: None,
        }
    }

    /// Sets the sustained rate.
    ///
    /// The burst size is left unchanged.
    pub fn requests_per_second(mut self, requests_per_second: u32) -> Self {
        self.config.requests_per_second = requests_per_second;
        self
    }

    /// Derives the sustained rate from a per-minute quota, keeping the
    /// current burst size.
    pub fn requests_per_minute(mut self, requests_per_minute: u32) -> Self {
        self.config.requests_per_second =
            RateLimiterConfig::per_minute(requests_per_minute).requests_per_second;
        self
    }

    /// Sets the bucket capacity.
    pub fn burst_size(mut self, burst_size: u32) -> Self {
        self.config.burst_size = burst_size;
        self
    }

    /// Uses `clock` instead of the tokio clock.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Builds the rate limiter.
    ///
    /// # Panics
    ///
    /// Panics if either the rate or the burst size is 0.
    /// Use `try_build()` to handle the error.
    pub fn build(self) -> RateLimiter {
        let clock = self.clock.unwrap_or_else(tokio_clock);
        RateLimiter::with_clock(self.config, clock)
    }

    /// Builds the rate limiter, returning an error for an invalid configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if either the rate or the burst size is 0.
    pub fn try_build(self) -> Result<RateLimiter, ConfigError> {
        self.config.validate()?;
        Ok(self.build())
    }
}

impl Default for RateLimiterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_basic_functionality() {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiterBuilder::new().clock(clock).build();

        for _ in 0..15 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_acquired, 15);
        assert_eq!(metrics.total_rejected, 1);
    }

    #[test]
    fn test_builder() {
        let limiter = RateLimiterBuilder::new()
            .requests_per_second(20)
            .burst_size(5)
            .clock(Arc::new(ManualClock::new()))
            .build();

        assert_eq!(limiter.config().requests_per_second, 20);
        assert_eq!(limiter.available_tokens(), 5.0);
    }

    #[test]
    fn test_builder_per_minute() {
        let limiter = RateLimiterBuilder::new()
            .requests_per_minute(BACKEND_REQUESTS_PER_MINUTE)
            .clock(Arc::new(ManualClock::new()))
            .build();

        assert_eq!(limiter.config().requests_per_second, 10);
        assert_eq!(limiter.config().burst_size, DEFAULT_BURST_SIZE);
    }

    #[test]
    fn test_builder_validation() {
        let zero_rate = RateLimiterBuilder::new().requests_per_second(0).try_build();
        assert_eq!(zero_rate.unwrap_err(), ConfigError::ZeroRate);

        let zero_burst = RateLimiterBuilder::new().burst_size(0).try_build();
        assert_eq!(zero_burst.unwrap_err(), ConfigError::ZeroBurst);
    }

    #[test]
    #[should_panic(expected = "invalid rate limiter configuration")]
    fn test_builder_build_panics_on_invalid() {
        let _ = RateLimiterBuilder::new()
            .burst_size(0)
            .clock(Arc::new(ManualClock::new()))
            .build();
    }

    #[test]
    fn test_thread_safety() {
        let limiter = Arc::new(
            RateLimiterBuilder::new()
                .requests_per_second(1)
                .burst_size(100)
                .clock(Arc::new(ManualClock::new()))
                .build(),
        );
        let mut handles = vec![];

        for _ in 0..10 {
            let limiter_clone = limiter.clone();
            handles.push(thread::spawn(move || {
                (0..50).filter(|_| limiter_clone.try_acquire()).count()
            }));
        }

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        // Time is frozen, so exactly the burst is handed out.
        assert_eq!(total, 100);
        assert_eq!(limiter.metrics().total_rejected, 400);
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _limiter: SharedRateLimiter = Arc::new(RateLimiter::new(10));
        let _config = RateLimiterConfig::default();
        let _queue_err: QueueError<()> = QueueError::Cleared;
        let _status = HealthStatus::Healthy;
        let throttle = Throttle::new(|n: u32| n, Duration::from_millis(10));
        assert_eq!(throttle.call(7), Some(7));
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(MSRV, "1.75.0");
        assert_eq!(DEFAULT_REQUESTS_PER_SECOND, 8);
        assert_eq!(DEFAULT_BURST_SIZE, 15);
        assert_eq!(DEFAULT_MIN_INTERVAL, Duration::from_millis(100));
        assert!(DEFAULT_REQUESTS_PER_SECOND * 60 < BACKEND_REQUESTS_PER_MINUTE);
    }

    #[test]
    fn test_builder_default() {
        let limiter = RateLimiterBuilder::default()
            .clock(Arc::new(ManualClock::new()))
            .build();
        assert_eq!(limiter.available_tokens(), DEFAULT_BURST_SIZE as f64);
    }
}
