//! # Throttle and Debounce
//!
//! Wrappers that shape how often a function is allowed to run.
//!
//! ```text
//!     calls:      x  x x   x         x x x x
//!     time:   ────┼──┼─┼───┼─────────┼─┼─┼─┼──────────►
//!
//!     Throttle    ▲        ▲         ▲     ▲       runs at most once per `wait`,
//!     (leading)                                    immediately when allowed
//!
//!     Debounce                ▲                ▲   runs once after `wait` of quiet,
//!                                                  with the last arguments
//! ```
//!
//! - [`Throttle`] wraps a synchronous function; suppressed calls return the
//!   cached result of the last execution.
//! - [`AsyncThrottle`] wraps a function returning a future; suppressed calls
//!   get the most recent in-flight (or completed) shared future.
//! - [`Debouncer`] schedules execution on the tokio runtime and can be
//!   cancelled.

use super::clock::{tokio_clock, SharedClock};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

#[inline]
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `true` when no call has run yet or `wait` has elapsed since the last one.
#[inline]
fn window_open(last: Option<Instant>, now: Instant, wait: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= wait,
    }
}

struct ThrottleState<R> {
    last_invocation: Option<Instant>,
    last_result: Option<R>,
}

/// Leading-edge throttle around a synchronous function.
///
/// # Example
///
/// ```rust
/// use pacer::Throttle;
/// use std::time::Duration;
///
/// let refresh = Throttle::new(|page: u32| page * 10, Duration::from_secs(60));
///
/// assert_eq!(refresh.call(1), Some(10));
/// // Suppressed: returns the cached result, the function does not run.
/// assert_eq!(refresh.call(2), Some(10));
/// ```
pub struct Throttle<F, R> {
    func: F,
    wait: Duration,
    clock: SharedClock,
    state: Mutex<ThrottleState<R>>,
}

impl<F, R: Clone> Throttle<F, R> {
    /// Wraps `func` so it runs at most once per `wait`.
    pub fn new(func: F, wait: Duration) -> Self {
        Self::with_clock(func, wait, tokio_clock())
    }

    /// Like [`Throttle::new`] with an explicit clock.
    pub fn with_clock(func: F, wait: Duration, clock: SharedClock) -> Self {
        Self {
            func,
            wait,
            clock,
            state: Mutex::new(ThrottleState {
                last_invocation: None,
                last_result: None,
            }),
        }
    }

    /// Runs the function if `wait` has elapsed since its last execution,
    /// otherwise returns the last result (`None` if it never ran).
    pub fn call<A>(&self, args: A) -> Option<R>
    where
        F: Fn(A) -> R,
    {
        let now = self.clock.now();
        {
            let mut state = lock(&self.state);
            if !window_open(state.last_invocation, now, self.wait) {
                trace!("throttled call suppressed");
                return state.last_result.clone();
            }
            state.last_invocation = Some(now);
        }

        let result = (self.func)(args);
        lock(&self.state).last_result = Some(result.clone());
        Some(result)
    }

    /// Result of the most recent execution.
    pub fn last_result(&self) -> Option<R> {
        lock(&self.state).last_result.clone()
    }

    /// Forgets the last execution so the next call runs immediately.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.last_invocation = None;
        state.last_result = None;
    }
}

impl<F, R> fmt::Debug for Throttle<F, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Throttle").field("wait", &self.wait).finish()
    }
}

/// Shared handle to the output of an [`AsyncThrottle`] invocation.
pub type SharedCall<T> = Shared<BoxFuture<'static, T>>;

struct AsyncThrottleState<T> {
    last_invocation: Option<Instant>,
    last_call: Option<SharedCall<T>>,
}

/// Leading-edge throttle around a function returning a future.
///
/// Calls inside the window share the future started by the last permitted
/// call, whether it is still running or already finished.
///
/// # Example
///
/// ```rust
/// use pacer::AsyncThrottle;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let poll = AsyncThrottle::new(
///     |source: &'static str| async move { format!("{source}: ok") },
///     Duration::from_secs(5),
/// );
///
/// let first = poll.call("orders");
/// let second = poll.call("customers");
/// assert_eq!(first.await, "orders: ok");
/// assert_eq!(second.await, "orders: ok");
/// # }
/// ```
pub struct AsyncThrottle<F, T> {
    func: F,
    wait: Duration,
    clock: SharedClock,
    state: Mutex<AsyncThrottleState<T>>,
}

impl<F, T> AsyncThrottle<F, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wraps `func` so a new call starts at most once per `wait`.
    pub fn new(func: F, wait: Duration) -> Self {
        Self::with_clock(func, wait, tokio_clock())
    }

    /// Like [`AsyncThrottle::new`] with an explicit clock.
    pub fn with_clock(func: F, wait: Duration, clock: SharedClock) -> Self {
        Self {
            func,
            wait,
            clock,
            state: Mutex::new(AsyncThrottleState {
                last_invocation: None,
                last_call: None,
            }),
        }
    }

    /// Starts a new call if the window is open, otherwise returns the last one.
    ///
    /// `func` is invoked while the throttle's state is locked; it should only
    /// build the future.
    pub fn call<A, Fut>(&self, args: A) -> SharedCall<T>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let now = self.clock.now();
        let mut state = lock(&self.state);

        if let Some(last_call) = &state.last_call {
            if !window_open(state.last_invocation, now, self.wait) {
                trace!("throttled async call joined previous invocation");
                return last_call.clone();
            }
        }

        let call = (self.func)(args).boxed().shared();
        state.last_invocation = Some(now);
        state.last_call = Some(call.clone());
        call
    }

    /// Forgets the last invocation so the next call starts immediately.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.last_invocation = None;
        state.last_call = None;
    }
}

impl<F, T> fmt::Debug for AsyncThrottle<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncThrottle").field("wait", &self.wait).finish()
    }
}

struct DebounceSlot {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

struct DebounceInner<A> {
    func: Box<dyn Fn(A) + Send + Sync>,
    wait: Duration,
    clock: SharedClock,
    slot: Mutex<DebounceSlot>,
}

/// Trailing-edge debounce: runs once after `wait` without further calls.
///
/// Clones share the same pending timer. Dropping a `Debouncer` does not
/// cancel an execution that is already scheduled; call
/// [`Debouncer::cancel`] for that.
///
/// # Example
///
/// ```rust
/// use pacer::Debouncer;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let search = Debouncer::new(
///     |query: String| println!("searching for {query}"),
///     Duration::from_millis(300),
/// );
///
/// search.call("d".to_string());
/// search.call("dr".to_string());
/// search.call("drift".to_string()); // only this one runs, 300ms from now
/// # }
/// ```
pub struct Debouncer<A> {
    inner: Arc<DebounceInner<A>>,
}

impl<A: Send + 'static> Debouncer<A> {
    /// Wraps `func` with a quiet period of `wait`.
    pub fn new<F>(func: F, wait: Duration) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::with_clock(func, wait, tokio_clock())
    }

    /// Like [`Debouncer::new`] with an explicit clock.
    pub fn with_clock<F>(func: F, wait: Duration, clock: SharedClock) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(DebounceInner {
                func: Box::new(func),
                wait,
                clock,
                slot: Mutex::new(DebounceSlot {
                    generation: 0,
                    task: None,
                }),
            }),
        }
    }

    /// Cancels any pending execution and schedules one for `wait` from now
    /// with `args`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn call(&self, args: A) {
        let mut slot = lock(&self.inner.slot);
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;

        let inner = Arc::clone(&self.inner);
        let quiet = inner.clock.sleep(inner.wait);
        slot.task = Some(tokio::spawn(async move {
            quiet.await;
            {
                let mut slot = lock(&inner.slot);
                // A newer call or a cancel raced with our timer.
                if slot.generation != generation {
                    return;
                }
                slot.task = None;
            }
            trace!("debounced call firing");
            (inner.func)(args);
        }));
    }

    /// Drops the pending execution, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let mut slot = lock(&self.inner.slot);
        slot.generation = slot.generation.wrapping_add(1);
        match slot.task.take() {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    /// Whether an execution is scheduled and has not fired yet.
    pub fn is_pending(&self) -> bool {
        lock(&self.inner.slot).task.is_some()
    }
}

impl<A> Clone for Debouncer<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for Debouncer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("wait", &self.inner.wait)
            .field("pending", &lock(&self.inner.slot).task.is_some())
            .finish()
    }
}
