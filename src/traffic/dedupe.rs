//! # In-flight Request Deduplication
//!
//! Collapses concurrent identical requests into a single underlying call.
//! Every caller asking for the same key while a request is in flight gets a
//! clone of the same [`Shared`] future and therefore the identical result.
//!
//! ```text
//!     widget A ──dedupe("sources")──┐
//!     widget B ──dedupe("sources")──┼──► one fetch ──► same Ok/Err to A, B, C
//!     widget C ──dedupe("sources")──┘
//!                                         │
//!                       entry removed ◄───┘ before any caller sees the result
//! ```
//!
//! ## Entry Lifecycle
//!
//! 1. First request for a key invokes the fetcher immediately, stores the
//!    shared future under a fresh generation id and spawns a task that
//!    drives it, so the request completes and its entry is released even if
//!    every caller drops its handle.
//! 2. Later requests for the key clone the stored future; their fetchers are
//!    never invoked.
//! 3. When the fetch settles (success or failure) the shared future removes
//!    its own entry, but only if the entry still carries its generation, and
//!    only then hands the output to waiters.
//!
//! `clear`/`clear_all` only affect whether the *next* request for a key is
//! fresh; futures already handed out still settle normally.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Shared, cloneable handle to a deduplicated request's result.
///
/// Two handles for the same in-flight request satisfy [`Shared::ptr_eq`].
pub type SharedRequest<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Pending<T, E> {
    generation: u64,
    request: SharedRequest<T, E>,
}

/// Pending-request table keyed by an opaque request key.
///
/// `T` and `E` must be `Clone` because every waiter receives its own copy of
/// the result; wrap non-cloneable errors in `Arc`.
///
/// # Example
///
/// ```rust
/// use pacer::Deduplicator;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let dedupe: Deduplicator<String, String> = Deduplicator::new();
/// let calls = Arc::new(AtomicUsize::new(0));
///
/// let fetch = |calls: Arc<AtomicUsize>| move || async move {
///     calls.fetch_add(1, Ordering::SeqCst);
///     Ok::<_, String>("42 sources".to_string())
/// };
///
/// let a = dedupe.dedupe("sources", fetch(calls.clone()));
/// let b = dedupe.dedupe("sources", fetch(calls.clone()));
///
/// assert_eq!(a.await, Ok("42 sources".to_string()));
/// assert_eq!(b.await, Ok("42 sources".to_string()));
/// assert_eq!(calls.load(Ordering::SeqCst), 1);
/// # }
/// ```
pub struct Deduplicator<T, E, K = String> {
    pending: Arc<DashMap<K, Pending<T, E>>>,
    next_generation: AtomicU64,
    total_started: AtomicU64,
    total_shared: AtomicU64,
    total_cleared: AtomicU64,
}

impl<T, E, K> Deduplicator<T, E, K>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            total_started: AtomicU64::new(0),
            total_shared: AtomicU64::new(0),
            total_cleared: AtomicU64::new(0),
        }
    }

    /// Returns the in-flight request for `key`, or starts one with `fetcher`.
    ///
    /// The fetcher is invoked without any table lock held, so it may inspect
    /// this deduplicator. If another caller starts the same key while the
    /// fetcher runs, that request wins and the future built here is dropped
    /// unpolled.
    ///
    /// Errors from the fetch reach every waiter unchanged.
    ///
    /// # Panics
    ///
    /// Panics if a new request has to be started outside a tokio runtime.
    pub fn dedupe<Q, F, Fut>(&self, key: Q, fetcher: F) -> SharedRequest<T, E>
    where
        Q: Into<K>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let key = key.into();
        if let Some(request) = self.join(&key) {
            return request;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let fetch = fetcher();
        let request = self.wrap(key.clone(), generation, fetch);

        match self.pending.entry(key) {
            Entry::Occupied(occupied) => {
                self.total_shared.fetch_add(1, Ordering::Relaxed);
                debug!(key = ?occupied.key(), "request started concurrently, joining it");
                occupied.get().request.clone()
            }
            Entry::Vacant(vacant) => {
                debug!(key = ?vacant.key(), generation, "starting request");
                vacant.insert(Pending {
                    generation,
                    request: request.clone(),
                });
                self.total_started.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(request.clone().map(drop));
                request
            }
        }
    }

    fn join(&self, key: &K) -> Option<SharedRequest<T, E>> {
        let entry = self.pending.get(key)?;
        self.total_shared.fetch_add(1, Ordering::Relaxed);
        debug!(key = ?entry.key(), "joining in-flight request");
        Some(entry.request.clone())
    }

    fn wrap<Fut>(&self, key: K, generation: u64, fetch: Fut) -> SharedRequest<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let pending: Weak<_> = Arc::downgrade(&self.pending);
        async move {
            let output = fetch.await;
            // Drop our own entry before any waiter observes the output,
            // so a caller starting now begins a fresh request.
            if let Some(pending) = pending.upgrade() {
                pending.remove_if(&key, |_, entry| entry.generation == generation);
            }
            output
        }
        .boxed()
        .shared()
    }

    /// Forgets the in-flight request for `key`, if any.
    ///
    /// Callers already holding the request still receive its result; the next
    /// `dedupe` for this key starts a fresh request. Returns whether an entry
    /// was removed.
    pub fn clear<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.pending.remove(key).is_some();
        if removed {
            self.total_cleared.fetch_add(1, Ordering::Relaxed);
            debug!("cleared in-flight request");
        }
        removed
    }

    /// Forgets every in-flight request.
    pub fn clear_all(&self) {
        let count = self.pending.len();
        self.pending.clear();
        self.total_cleared.fetch_add(count as u64, Ordering::Relaxed);
        info!("Cleared all {} in-flight requests", count);
    }

    /// Whether a request for `key` is currently in flight.
    pub fn is_pending<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.pending.contains_key(key)
    }

    /// Number of keys with a request in flight.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Lifetime counters.
    pub fn stats(&self) -> DedupeStats {
        DedupeStats {
            pending: self.pending_count(),
            total_started: self.total_started.load(Ordering::Relaxed),
            total_shared: self.total_shared.load(Ordering::Relaxed),
            total_cleared: self.total_cleared.load(Ordering::Relaxed),
        }
    }
}

impl<T, E, K> Default for Deduplicator<T, E, K>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E, K: Eq + Hash> fmt::Debug for Deduplicator<T, E, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deduplicator")
            .field("pending", &self.pending.len())
            .field("total_started", &self.total_started.load(Ordering::Relaxed))
            .finish()
    }
}

/// Counters describing a [`Deduplicator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupeStats {
    /// Keys with a request currently in flight.
    pub pending: usize,
    /// Underlying requests actually started.
    pub total_started: u64,
    /// Calls that joined an already in-flight request.
    pub total_shared: u64,
    /// Entries evicted through `clear`/`clear_all`.
    pub total_cleared: u64,
}

impl DedupeStats {
    /// Fraction of all calls that were served by an existing request.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.total_started + self.total_shared;
        if total == 0 {
            0.0
        } else {
            self.total_shared as f64 / total as f64
        }
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Deduplicator Stats:\n\
             ├─ In Flight: {}\n\
             ├─ Started: {}\n\
             ├─ Shared: {} ({:.2}% hit ratio)\n\
             └─ Cleared: {}",
            self.pending,
            self.total_started,
            self.total_shared,
            self.hit_ratio() * 100.0,
            self.total_cleared,
        )
    }
}

impl fmt::Display for DedupeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
