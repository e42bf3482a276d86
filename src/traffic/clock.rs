//! # Time Source (clock.rs)
//!
//! Every primitive in this crate reads time and waits through a [`Clock`]
//! instead of calling the runtime directly. Production code uses
//! [`TokioClock`]; tests either run tokio with a paused clock or drive a
//! [`ManualClock`] by hand.
//!
//! ```text
//!     Clock implementations:
//!
//!     TokioClock:
//!     ├─ now()   → tokio::time::Instant::now()
//!     └─ sleep() → tokio::time::sleep()   (honours start_paused tests)
//!
//!     ManualClock:
//!     ├─ now()   → origin + virtual offset
//!     ├─ advance(d) moves the offset forward and wakes due sleepers
//!     └─ sleep(d) completes once the offset reaches creation time + d
//!        (auto_advancing(): advances the offset by d when first polled)
//! ```

use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Source of "now" and of timer-based waiting.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Returns a future that completes once `duration` has elapsed on this clock.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock shared between a primitive and its caller.
pub type SharedClock = Arc<dyn Clock>;

/// Returns the default clock backed by the tokio timer.
pub fn tokio_clock() -> SharedClock {
    Arc::new(TokioClock)
}

/// Clock backed by `tokio::time`.
///
/// Under `#[tokio::test(start_paused = true)]` time only moves when every
/// task is idle, which makes timer-driven tests deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

/// Virtual clock for deterministic tests.
///
/// Time never moves by itself; [`ManualClock::advance`] moves it forward.
/// A [`Clock::sleep`] future measures its deadline from the moment it was
/// created and stays pending until `advance` carries the clock past it, so a
/// timer that is created and then cancelled leaves time untouched.
///
/// [`ManualClock::auto_advancing`] builds a clock whose sleeps instead move
/// time forward themselves when first polled, which lets a retry loop built
/// on `sleep` make progress without a driver.
///
/// # Example
///
/// ```rust
/// use pacer::{ManualClock, RateLimiter, RateLimiterConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::new());
/// let limiter = RateLimiter::with_clock(RateLimiterConfig::new(1, 1), clock.clone());
///
/// assert!(limiter.try_acquire());
/// assert!(!limiter.try_acquire());
///
/// clock.advance(Duration::from_secs(1));
/// assert!(limiter.try_acquire());
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<watch::Sender<Duration>>,
    auto_advance: bool,
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Creates a frozen clock whose sleeps advance it by their own duration.
    pub fn auto_advancing() -> Self {
        Self::build(true)
    }

    fn build(auto_advance: bool) -> Self {
        let (offset, _) = watch::channel(Duration::ZERO);
        Self {
            origin: Instant::now(),
            offset: Arc::new(offset),
            auto_advance,
        }
    }

    /// Moves virtual time forward by `duration`, waking sleeps that are due.
    pub fn advance(&self, duration: Duration) {
        self.offset.send_modify(|offset| *offset += duration);
    }

    /// Total virtual time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset.borrow()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        if self.auto_advance {
            let clock = self.clone();
            return async move { clock.advance(duration) }.boxed();
        }

        let deadline = self.elapsed() + duration;
        let mut offset = self.offset.subscribe();
        async move {
            while *offset.borrow_and_update() < deadline {
                // Every clone is gone, so time can never reach the deadline.
                if offset.changed().await.is_err() {
                    return;
                }
            }
        }
        .boxed()
    }
}

/// Fractional milliseconds between two instants (zero if `later` is earlier).
#[inline]
pub(crate) fn elapsed_ms(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_nanos() as f64 / 1_000_000.0
}

/// Rounds a fractional millisecond count up to a whole-millisecond duration.
#[inline]
pub(crate) fn ceil_ms(ms: f64) -> Duration {
    if ms <= 0.0 || !ms.is_finite() {
        return Duration::ZERO;
    }
    Duration::from_millis(ms.ceil() as u64)
}
