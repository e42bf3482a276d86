//! # Serialized Request Queue
//!
//! Runs asynchronous operations one at a time, in the order they were added,
//! with at least `min_interval` between the end of one and the start of the
//! next.
//!
//! ```text
//!     add(A) add(B) add(C)
//!        │     │     │
//!        ▼     ▼     ▼
//!     ┌─────┬─────┬─────┐
//!     │  A  │  B  │  C  │ ◄── FIFO, not yet dispatched (pending_count = 3)
//!     └──┬──┴─────┴─────┘
//!        │ drain task (only one per queue)
//!        ▼
//!     run A ──► resolve A's caller ──► sleep min_interval ──► run B ──► ...
//! ```
//!
//! A failing operation only affects its own caller; the drain loop itself
//! never fails; an operation that panics is reported to its caller as
//! [`QueueError::Aborted`] and the queue moves on. `clear()` rejects
//! everything still waiting with [`QueueError::Cleared`] but cannot
//! interrupt the operation currently running.

use super::{
    clock::{tokio_clock, SharedClock},
    config::QueueConfig,
    error::QueueError,
};
use futures::future::{BoxFuture, FutureExt};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How a dispatched operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    Aborted,
}

/// Type-erased work item.
trait Job: Send {
    /// Runs the operation and reports its result to the caller.
    fn run(self: Box<Self>) -> BoxFuture<'static, Outcome>;

    /// Tells the caller the item was cleared without running it.
    fn reject(self: Box<Self>);
}

struct Item<F, T, E> {
    operation: F,
    reply: oneshot::Sender<Result<T, QueueError<E>>>,
}

impl<F, Fut, T, E> Job for Item<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, Outcome> {
        let Item { operation, reply } = *self;
        async move {
            let (result, outcome) =
                match AssertUnwindSafe(async move { operation().await }).catch_unwind().await {
                    Ok(Ok(value)) => (Ok(value), Outcome::Completed),
                    Ok(Err(err)) => (Err(QueueError::Failed(err)), Outcome::Failed),
                    Err(_) => (Err(QueueError::Aborted), Outcome::Aborted),
                };
            // The caller may have stopped waiting; the work still counts.
            let _ = reply.send(result);
            outcome
        }
        .boxed()
    }

    fn reject(self: Box<Self>) {
        let _ = self.reply.send(Err(QueueError::Cleared));
    }
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<Box<dyn Job>>,
    processing: bool,
}

struct Inner {
    state: Mutex<QueueState>,
    min_interval: Duration,
    clock: SharedClock,
    total_enqueued: AtomicU64,
    total_completed: AtomicU64,
    total_failed: AtomicU64,
    total_aborted: AtomicU64,
    total_cleared: AtomicU64,
}

impl Inner {
    #[inline]
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// FIFO queue that dispatches one operation at a time with enforced spacing.
///
/// Cloning the queue yields another handle to the same queue.
///
/// # Example
///
/// ```rust
/// use pacer::RequestQueue;
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = RequestQueue::new(Duration::from_millis(100));
///
/// let a = queue.add(|| async { Ok::<_, String>("validations") });
/// let b = queue.add(|| async { Ok::<_, String>("profiles") });
///
/// assert_eq!(a.await, Ok("validations"));
/// assert_eq!(b.await, Ok("profiles"));
/// # }
/// ```
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<Inner>,
}

impl RequestQueue {
    /// Creates a queue with the given minimum spacing between dispatches.
    pub fn new(min_interval: Duration) -> Self {
        Self::with_config(QueueConfig::new(min_interval))
    }

    /// Creates a queue from a [`QueueConfig`].
    pub fn with_config(config: QueueConfig) -> Self {
        Self::with_clock(config, tokio_clock())
    }

    /// Creates a queue whose spacing sleeps go through `clock`.
    pub fn with_clock(config: QueueConfig, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                min_interval: config.min_interval,
                clock,
                total_enqueued: AtomicU64::new(0),
                total_completed: AtomicU64::new(0),
                total_failed: AtomicU64::new(0),
                total_aborted: AtomicU64::new(0),
                total_cleared: AtomicU64::new(0),
            }),
        }
    }

    /// Appends `operation` to the queue and returns a future for its result.
    ///
    /// The operation is enqueued immediately, before the returned future is
    /// polled; it is only invoked once every item added before it has
    /// finished. Dropping the returned future does not remove the item.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime while the queue is idle.
    pub fn add<F, Fut, T, E>(
        &self,
        operation: F,
    ) -> impl Future<Output = Result<T, QueueError<E>>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let job: Box<dyn Job> = Box::new(Item { operation, reply });

        let start_drain = {
            let mut state = self.inner.state();
            state.items.push_back(job);
            !std::mem::replace(&mut state.processing, true)
        };
        self.inner.total_enqueued.fetch_add(1, Ordering::Relaxed);

        if start_drain {
            debug!("request queue starting drain task");
            tokio::spawn(Self::drain(Arc::clone(&self.inner)));
        }

        async move {
            // A dropped sender means the item was lost with the runtime.
            rx.await.unwrap_or(Err(QueueError::Aborted))
        }
    }

    async fn drain(inner: Arc<Inner>) {
        loop {
            let job = {
                let mut state = inner.state();
                match state.items.pop_front() {
                    Some(job) => job,
                    None => {
                        state.processing = false;
                        debug!("request queue drained");
                        return;
                    }
                }
            };

            match job.run().await {
                Outcome::Completed => {
                    inner.total_completed.fetch_add(1, Ordering::Relaxed);
                }
                Outcome::Failed => {
                    inner.total_failed.fetch_add(1, Ordering::Relaxed);
                    debug!("queued operation failed");
                }
                Outcome::Aborted => {
                    inner.total_aborted.fetch_add(1, Ordering::Relaxed);
                    warn!("queued operation panicked");
                }
            }

            let more = !inner.state().items.is_empty();
            if more {
                inner.clock.sleep(inner.min_interval).await;
            }
        }
    }

    /// Rejects every item that has not been dispatched yet.
    ///
    /// Each affected caller receives [`QueueError::Cleared`]. The operation
    /// currently running, if any, finishes normally. Returns the number of
    /// rejected items.
    pub fn clear(&self) -> usize {
        let dropped = std::mem::take(&mut self.inner.state().items);
        let count = dropped.len();
        for job in dropped {
            job.reject();
        }

        if count > 0 {
            self.inner
                .total_cleared
                .fetch_add(count as u64, Ordering::Relaxed);
            warn!("Request queue cleared with {} pending operations", count);
        } else {
            info!("Request queue cleared");
        }
        count
    }

    /// Items waiting to be dispatched (excluding the one running).
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.inner.state().items.len()
    }

    /// Whether the drain task is active.
    #[inline]
    pub fn is_processing(&self) -> bool {
        self.inner.state().processing
    }

    /// Configured spacing between dispatches.
    pub fn min_interval(&self) -> Duration {
        self.inner.min_interval
    }

    /// Lifetime counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.pending_count(),
            total_enqueued: self.inner.total_enqueued.load(Ordering::Relaxed),
            total_completed: self.inner.total_completed.load(Ordering::Relaxed),
            total_failed: self.inner.total_failed.load(Ordering::Relaxed),
            total_aborted: self.inner.total_aborted.load(Ordering::Relaxed),
            total_cleared: self.inner.total_cleared.load(Ordering::Relaxed),
        }
    }
}

impl Default for RequestQueue {
    /// Queue with the default 100ms spacing.
    fn default() -> Self {
        Self::with_config(QueueConfig::default())
    }
}

impl fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state();
        f.debug_struct("RequestQueue")
            .field("min_interval", &self.inner.min_interval)
            .field("pending", &state.items.len())
            .field("processing", &state.processing)
            .finish()
    }
}

/// Counters describing a [`RequestQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Items waiting to be dispatched.
    pub pending: usize,
    /// Items ever added.
    pub total_enqueued: u64,
    /// Operations that ran and succeeded.
    pub total_completed: u64,
    /// Operations that ran and failed.
    pub total_failed: u64,
    /// Operations that panicked.
    pub total_aborted: u64,
    /// Items rejected by `clear()`.
    pub total_cleared: u64,
}

impl QueueStats {
    /// Items that have been dispatched and finished, however they ended.
    pub fn total_dispatched(&self) -> u64 {
        self.total_completed + self.total_failed + self.total_aborted
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Request Queue Stats:\n\
             ├─ Pending: {}\n\
             ├─ Enqueued: {}\n\
             ├─ Completed: {}\n\
             ├─ Failed: {}\n\
             ├─ Aborted: {}\n\
             └─ Cleared: {}",
            self.pending,
            self.total_enqueued,
            self.total_completed,
            self.total_failed,
            self.total_aborted,
            self.total_cleared,
        )
    }
}

impl fmt::Display for QueueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traffic::clock::ManualClock;
    use tokio::time::{sleep, Instant};

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order_and_spacing() {
        let queue = RequestQueue::new(Duration::from_millis(100));
        let log: Arc<Mutex<Vec<(&'static str, Instant, Instant)>>> = Arc::default();

        let mut handles = Vec::new();
        for name in ["A", "B", "C"] {
            let log = log.clone();
            handles.push(queue.add(move || async move {
                let start = Instant::now();
                sleep(Duration::from_millis(30)).await;
                log.lock().unwrap().push((name, start, Instant::now()));
                Ok::<_, ()>(name)
            }));
        }
        assert_eq!(queue.pending_count(), 3);

        for (handle, expected) in handles.into_iter().zip(["A", "B", "C"]) {
            assert_eq!(handle.await, Ok(expected));
        }

        let log = log.lock().unwrap();
        let order: Vec<_> = log.iter().map(|(name, _, _)| *name).collect();
        assert_eq!(order, vec!["A", "B", "C"]);
        for pair in log.windows(2) {
            let (_, _, prev_end) = pair[0];
            let (_, next_start, _) = pair[1];
            assert!(next_start - prev_end >= Duration::from_millis(100));
        }
    }

    #[tokio::test]
    async fn test_spacing_with_manual_clock() {
        let clock = Arc::new(ManualClock::auto_advancing());
        let queue = RequestQueue::with_clock(QueueConfig::from_millis(100), clock.clone());

        let a = queue.add(|| async { Ok::<_, ()>(1) });
        let b = queue.add(|| async { Ok::<_, ()>(2) });
        let c = queue.add(|| async { Ok::<_, ()>(3) });

        assert_eq!(c.await, Ok(3));
        assert_eq!(a.await, Ok(1));
        assert_eq!(b.await, Ok(2));
        // Two gaps between three items, none after the last.
        assert_eq!(clock.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_failure_only_affects_its_caller() {
        let queue = RequestQueue::with_clock(
            QueueConfig::from_millis(10),
            Arc::new(ManualClock::auto_advancing()),
        );

        let failing = queue.add(|| async { Err::<u32, _>("500 Internal Server Error") });
        let healthy = queue.add(|| async { Ok::<u32, &str>(200) });

        assert_eq!(failing.await, Err(QueueError::Failed("500 Internal Server Error")));
        assert_eq!(healthy.await, Ok(200));

        let stats = queue.stats();
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.total_dispatched(), 2);
    }

    #[tokio::test]
    async fn test_clear_rejects_waiting_items_only() {
        let queue = RequestQueue::with_clock(
            QueueConfig::from_millis(100),
            Arc::new(ManualClock::auto_advancing()),
        );
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let running = queue.add(move || async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok::<_, ()>("finished")
        });
        let waiting_b = queue.add(|| async { Ok::<_, ()>("b") });
        let waiting_c = queue.add(|| async { Ok::<_, ()>("c") });

        started_rx.await.unwrap();
        assert_eq!(queue.pending_count(), 2);
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.pending_count(), 0);

        assert_eq!(waiting_b.await, Err(QueueError::Cleared));
        assert!(waiting_c.await.unwrap_err().is_cleared());

        release_tx.send(()).unwrap();
        assert_eq!(running.await, Ok("finished"));
        assert_eq!(queue.stats().total_cleared, 2);
    }

    #[tokio::test]
    async fn test_queue_restarts_after_draining() {
        let queue = RequestQueue::with_clock(
            QueueConfig::from_millis(100),
            Arc::new(ManualClock::auto_advancing()),
        );

        assert_eq!(queue.add(|| async { Ok::<_, ()>(1) }).await, Ok(1));
        tokio::task::yield_now().await;
        assert!(!queue.is_processing());

        assert_eq!(queue.add(|| async { Ok::<_, ()>(2) }).await, Ok(2));
        assert_eq!(queue.stats().total_enqueued, 2);
    }

    #[tokio::test]
    async fn test_dropped_caller_does_not_stall_queue() {
        let queue = RequestQueue::with_clock(
            QueueConfig::from_millis(5),
            Arc::new(ManualClock::auto_advancing()),
        );

        drop(queue.add(|| async { Ok::<_, ()>(1) }));
        assert_eq!(queue.add(|| async { Ok::<_, ()>(2) }).await, Ok(2));
        assert_eq!(queue.stats().total_completed, 2);
    }

    #[tokio::test]
    async fn test_panicking_operation_is_aborted_not_cleared() {
        let queue = RequestQueue::with_clock(
            QueueConfig::from_millis(10),
            Arc::new(ManualClock::auto_advancing()),
        );

        let exploding = queue.add(|| async {
            if true {
                panic!("widget renderer exploded");
            }
            Ok::<u32, &str>(0)
        });
        let healthy = queue.add(|| async { Ok::<u32, &str>(200) });

        let err = exploding.await.unwrap_err();
        assert!(err.is_aborted());
        assert!(!err.is_cleared());
        assert_eq!(healthy.await, Ok(200));

        let stats = queue.stats();
        assert_eq!(stats.total_aborted, 1);
        assert_eq!(stats.total_completed, 1);
        assert_eq!(stats.total_cleared, 0);
        assert_eq!(stats.total_dispatched(), 2);
        assert!(stats.summary().contains("Aborted: 1"));
    }

    #[test]
    fn test_default_interval() {
        assert_eq!(RequestQueue::default().min_interval(), Duration::from_millis(100));
    }
}
