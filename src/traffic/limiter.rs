//! # Token Bucket Rate Limiter
//!
//! Caps the sustained and burst rate of outbound requests for everything
//! that shares one limiter instance.
//!
//! ```text
//!     Continuous refill:
//!
//!     t=0ms     [●●●●●●●●●●●●●●●] 15/15 tokens  (starts full)
//!     15 reqs   [               ]  0/15         (burst spent)
//!     t=125ms   [●              ]  1/15         (8/s → one token per 125ms)
//!     t=187ms   [◐              ] 0.5/15        (after one more request)
//! ```
//!
//! Refill is lazy: `try_acquire`, `acquire`, `wait_time` and
//! `available_tokens` all credit `elapsed_ms × requests_per_second / 1000`
//! tokens (capped at the burst size) before doing anything else, so a refill
//! twice in a row adds nothing extra.
//!
//! ## Waiting
//!
//! `acquire` never blocks a thread. It retries on a timer, sleeping the time
//! one token takes to regenerate between attempts. It has no built-in bound;
//! use [`RateLimiter::acquire_timeout`] or [`RateLimiter::acquire_until`] when
//! the caller must be able to give up.

use super::{
    clock::{ceil_ms, elapsed_ms, tokio_clock, SharedClock},
    config::RateLimiterConfig,
    error::{AcquireError, ConfigError},
    metrics::RateLimiterMetrics,
};
use futures::future::{self, Either};
use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Mutable bucket state, always read and written under the limiter's mutex.
#[derive(Debug)]
struct Bucket {
    /// Fractional token count, `0 ≤ tokens ≤ bucket_size`.
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    #[inline]
    fn refill(&mut self, now: Instant, requests_per_second: f64, bucket_size: f64) {
        let elapsed = elapsed_ms(self.last_refill, now);
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * requests_per_second / 1000.0).min(bucket_size);
        }
        self.last_refill = now;
    }
}

/// Token bucket rate limiter with fractional, continuously refilled tokens.
///
/// Share it between call sites with `Arc<RateLimiter>`; every operation takes
/// `&self`.
///
/// # Example
///
/// ```rust
/// use pacer::{RateLimiter, RateLimiterConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter = RateLimiter::with_config(RateLimiterConfig::new(8, 15));
///
/// // Non-blocking check
/// if limiter.try_acquire() {
///     // issue the request
/// }
///
/// // Or wait for a token
/// limiter.acquire().await;
/// # }
/// ```
pub struct RateLimiter {
    config: RateLimiterConfig,
    bucket: Mutex<Bucket>,
    clock: SharedClock,

    total_acquired: AtomicU64,
    total_rejected: AtomicU64,
    total_waits: AtomicU64,
    total_wait_ns: AtomicU64,
    consecutive_rejections: AtomicU32,
}

impl RateLimiter {
    /// Creates a limiter for `requests_per_second` with burst `2 × requests_per_second`.
    ///
    /// # Panics
    ///
    /// Panics if `requests_per_second` is 0.
    pub fn new(requests_per_second: u32) -> Self {
        Self::with_config(RateLimiterConfig::per_second(requests_per_second))
    }

    /// Creates a limiter from a full configuration using the tokio clock.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid (see [`RateLimiterConfig::validate`]).
    /// Use [`RateLimiter::try_with_config`] to handle the error instead.
    pub fn with_config(config: RateLimiterConfig) -> Self {
        Self::with_clock(config, tokio_clock())
    }

    /// Fallible variant of [`RateLimiter::with_config`].
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] reported by [`RateLimiterConfig::validate`].
    pub fn try_with_config(config: RateLimiterConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, tokio_clock()))
    }

    /// Creates a limiter that reads time from `clock`.
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid.
    pub fn with_clock(config: RateLimiterConfig, clock: SharedClock) -> Self {
        if let Err(err) = config.validate() {
            panic!("invalid rate limiter configuration: {err}");
        }
        Self::build(config, clock)
    }

    pub(crate) fn build(config: RateLimiterConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: config.burst_size as f64,
                last_refill: now,
            }),
            clock,
            total_acquired: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_waits: AtomicU64::new(0),
            total_wait_ns: AtomicU64::new(0),
            consecutive_rejections: AtomicU32::new(0),
        }
    }

    /// Bucket capacity as a token count.
    #[inline]
    pub fn bucket_size(&self) -> f64 {
        self.config.burst_size as f64
    }

    /// Locks the bucket and applies the lazy refill.
    #[inline]
    fn refilled(&self) -> MutexGuard<'_, Bucket> {
        let now = self.clock.now();
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.refill(now, self.config.requests_per_second as f64, self.bucket_size());
        bucket
    }

    /// Takes one token if available without touching the rejection counters.
    #[inline]
    fn take_token(&self) -> bool {
        let mut bucket = self.refilled();
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            drop(bucket);
            self.total_acquired.fetch_add(1, Ordering::Relaxed);
            self.consecutive_rejections.store(0, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Takes a token if one is available right now.
    ///
    /// Returns `false` without consuming anything when fewer than one token
    /// is left after refill.
    pub fn try_acquire(&self) -> bool {
        if self.take_token() {
            return true;
        }
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
        self.consecutive_rejections.fetch_add(1, Ordering::Relaxed);
        trace!("rate limiter rejected request");
        false
    }

    /// Waits until a token is available and takes it.
    ///
    /// Between attempts the caller sleeps for the time one token takes to
    /// regenerate (`ceil(1000 / requests_per_second)` ms). There is no upper
    /// bound on the number of attempts.
    pub async fn acquire(&self) {
        let interval = self.config.token_interval();
        while !self.take_token() {
            self.record_wait(interval);
            self.clock.sleep(interval).await;
        }
    }

    /// Like [`RateLimiter::acquire`] but gives up once `timeout` has elapsed.
    ///
    /// The final attempt is made at the deadline itself.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::TimedOut`] if no token became available in time.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<(), AcquireError> {
        let deadline = self.clock.now() + timeout;
        let interval = self.config.token_interval();
        loop {
            if self.take_token() {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(self.clock.now());
            if remaining.is_zero() {
                debug!(?timeout, "rate limiter acquire timed out");
                return Err(AcquireError::TimedOut);
            }
            let nap = interval.min(remaining);
            self.record_wait(nap);
            self.clock.sleep(nap).await;
        }
    }

    /// Like [`RateLimiter::acquire`] but stops retrying when `cancel` completes.
    ///
    /// If cancellation wins no token is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::Cancelled`] if `cancel` resolved first.
    ///
    /// # Example
    ///
    /// ```rust
    /// use pacer::{AcquireError, RateLimiter, RateLimiterConfig};
    /// use tokio::sync::oneshot;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let limiter = RateLimiter::with_config(RateLimiterConfig::new(1, 1));
    /// limiter.acquire().await;
    ///
    /// let (stop, stopped) = oneshot::channel::<()>();
    /// drop(stop);
    /// let result = limiter.acquire_until(async { let _ = stopped.await; }).await;
    /// assert_eq!(result, Err(AcquireError::Cancelled));
    /// # }
    /// ```
    pub async fn acquire_until<C>(&self, cancel: C) -> Result<(), AcquireError>
    where
        C: Future<Output = ()>,
    {
        let acquire = pin!(self.acquire());
        let cancel = pin!(cancel);
        match future::select(acquire, cancel).await {
            Either::Left(((), _)) => Ok(()),
            Either::Right(((), _)) => {
                debug!("rate limiter acquire cancelled");
                Err(AcquireError::Cancelled)
            }
        }
    }

    /// Time until a token would be available; zero if one is available now.
    ///
    /// Performs the lazy refill but never consumes a token.
    pub fn wait_time(&self) -> Duration {
        let bucket = self.refilled();
        if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            ceil_ms((1.0 - bucket.tokens) * 1000.0 / self.config.requests_per_second as f64)
        }
    }

    /// Current fractional token count after refill.
    pub fn available_tokens(&self) -> f64 {
        self.refilled().tokens
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Snapshot of the counters and bucket state.
    pub fn metrics(&self) -> RateLimiterMetrics {
        RateLimiterMetrics {
            total_acquired: self.total_acquired.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_waits: self.total_waits.load(Ordering::Relaxed),
            total_wait_time: Duration::from_nanos(self.total_wait_ns.load(Ordering::Relaxed)),
            current_tokens: self.available_tokens(),
            bucket_size: self.bucket_size(),
            consecutive_rejections: self.consecutive_rejections.load(Ordering::Relaxed),
        }
    }

    /// Refills the bucket to capacity and zeroes all counters.
    pub fn reset(&self) {
        {
            let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
            bucket.tokens = self.bucket_size();
            bucket.last_refill = self.clock.now();
        }
        self.total_acquired.store(0, Ordering::Relaxed);
        self.total_rejected.store(0, Ordering::Relaxed);
        self.total_waits.store(0, Ordering::Relaxed);
        self.total_wait_ns.store(0, Ordering::Relaxed);
        self.consecutive_rejections.store(0, Ordering::Relaxed);
        debug!(burst_size = self.config.burst_size, "rate limiter reset");
    }

    #[inline]
    fn record_wait(&self, nap: Duration) {
        self.total_waits.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(nap.as_nanos()).unwrap_or(u64::MAX);
        self.total_wait_ns.fetch_add(nanos, Ordering::Relaxed);
        trace!(?nap, "rate limiter waiting for token");
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("requests_per_second", &self.config.requests_per_second)
            .field("burst_size", &self.config.burst_size)
            .field("current_tokens", &self.available_tokens())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::clock::ManualClock;
    use std::sync::Arc;

    fn manual(rps: u32, burst: u32) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(RateLimiterConfig::new(rps, burst), clock.clone());
        (clock, limiter)
    }

    #[test]
    fn test_burst_then_throttle() {
        let (clock, limiter) = manual(8, 15);

        for _ in 0..15 {
            assert!(limiter.try_acquire());
        }
        assert!(!limiter.try_acquire());

        clock.advance(Duration::from_millis(125));
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_default_burst_is_double_rate() {
        let limiter = RateLimiter::new(4);
        assert_eq!(limiter.config().burst_size, 8);
        assert_eq!(limiter.available_tokens(), 8.0);
    }

    #[test]
    fn test_refill_caps_at_bucket_size() {
        let (clock, limiter) = manual(8, 15);
        assert!(limiter.try_acquire());

        clock.advance(Duration::from_secs(3600));
        assert_eq!(limiter.available_tokens(), 15.0);
    }

    #[test]
    fn test_refill_is_idempotent() {
        let (clock, limiter) = manual(8, 15);
        for _ in 0..15 {
            assert!(limiter.try_acquire());
        }

        clock.advance(Duration::from_millis(50));
        let first = limiter.available_tokens();
        let second = limiter.available_tokens();
        assert_eq!(first, 0.4);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tokens_stay_bounded() {
        let (clock, limiter) = manual(8, 15);
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;

        for _ in 0..2_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            match seed % 4 {
                0 => clock.advance(Duration::from_millis(seed % 300)),
                1 => {
                    limiter.wait_time();
                }
                _ => {
                    limiter.try_acquire();
                }
            }
            let tokens = limiter.available_tokens();
            assert!((0.0..=15.0).contains(&tokens), "tokens out of range: {tokens}");
        }
    }

    #[test]
    fn test_wait_time_when_drained() {
        let (clock, limiter) = manual(8, 15);
        assert_eq!(limiter.wait_time(), Duration::ZERO);

        for _ in 0..15 {
            assert!(limiter.try_acquire());
        }
        let wait = limiter.wait_time();
        assert_eq!(wait, Duration::from_millis(125));

        clock.advance(wait);
        assert!(limiter.try_acquire());
    }

    #[test]
    fn test_wait_time_with_partial_token() {
        let (clock, limiter) = manual(8, 15);
        for _ in 0..15 {
            assert!(limiter.try_acquire());
        }

        clock.advance(Duration::from_millis(50));
        let wait = limiter.wait_time();
        assert_eq!(wait, Duration::from_millis(75));

        // Observing the wait time never consumes a token.
        assert_eq!(limiter.available_tokens(), 0.4);

        clock.advance(wait);
        assert!(limiter.try_acquire());
    }

    fn auto_advancing(rps: u32, burst: u32) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::auto_advancing());
        let limiter = RateLimiter::with_clock(RateLimiterConfig::new(rps, burst), clock.clone());
        (clock, limiter)
    }

    #[tokio::test]
    async fn test_acquire_sleeps_on_manual_clock() {
        let (clock, limiter) = auto_advancing(8, 2);
        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(clock.elapsed(), Duration::ZERO);

        limiter.acquire().await;
        assert_eq!(clock.elapsed(), Duration::from_millis(125));

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_acquired, 3);
        assert_eq!(metrics.total_rejected, 0);
        assert_eq!(metrics.total_waits, 1);
        assert_eq!(metrics.total_wait_time, Duration::from_millis(125));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_with_tokio_clock() {
        let limiter = RateLimiter::with_config(RateLimiterConfig::new(10, 1));
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;

        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let (clock, limiter) = auto_advancing(1, 1);
        assert!(limiter.try_acquire());

        let result = limiter.acquire_timeout(Duration::from_millis(400)).await;
        assert_eq!(result, Err(AcquireError::TimedOut));
        assert_eq!(clock.elapsed(), Duration::from_millis(400));

        assert_eq!(limiter.acquire_timeout(Duration::from_secs(1)).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_until_cancelled() {
        let limiter = RateLimiter::with_config(RateLimiterConfig::new(1, 1));
        assert!(limiter.try_acquire());

        let cancel = tokio::time::sleep(Duration::from_millis(200));
        assert_eq!(limiter.acquire_until(cancel).await, Err(AcquireError::Cancelled));

        // The cancelled attempt left the bucket untouched.
        assert_eq!(limiter.metrics().total_acquired, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_until_succeeds() {
        let limiter = RateLimiter::with_config(RateLimiterConfig::new(10, 1));
        assert!(limiter.try_acquire());

        let cancel = tokio::time::sleep(Duration::from_secs(5));
        assert_eq!(limiter.acquire_until(cancel).await, Ok(()));
    }

    #[test]
    fn test_rejection_counters() {
        let (_clock, limiter) = manual(1, 2);
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        for _ in 0..3 {
            assert!(!limiter.try_acquire());
        }

        let metrics = limiter.metrics();
        assert_eq!(metrics.total_acquired, 2);
        assert_eq!(metrics.total_rejected, 3);
        assert_eq!(metrics.consecutive_rejections, 3);
    }

    #[test]
    fn test_reset() {
        let (_clock, limiter) = manual(2, 4);
        for _ in 0..6 {
            limiter.try_acquire();
        }

        limiter.reset();
        assert_eq!(limiter.available_tokens(), 4.0);
        let metrics = limiter.metrics();
        assert_eq!(metrics.total_acquired, 0);
        assert_eq!(metrics.total_rejected, 0);
        assert_eq!(metrics.consecutive_rejections, 0);
    }

    #[test]
    fn test_try_with_config_rejects_zero_rate() {
        let result = RateLimiter::try_with_config(RateLimiterConfig::new(0, 5));
        assert!(matches!(result, Err(ConfigError::ZeroRate)));
    }

    #[test]
    #[should_panic(expected = "invalid rate limiter configuration")]
    fn test_with_config_panics_on_zero_burst() {
        let _ = RateLimiter::with_config(RateLimiterConfig::new(5, 0));
    }

    #[test]
    fn test_debug_impl() {
        let limiter = RateLimiter::with_config(RateLimiterConfig::new(8, 15));
        let debug_str = format!("{:?}", limiter);

        assert!(debug_str.contains("RateLimiter"));
        assert!(debug_str.contains("requests_per_second: 8"));
        assert!(debug_str.contains("burst_size: 15"));
    }
}
