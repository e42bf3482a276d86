//! # Process-wide Instances
//!
//! One request queue and one rate limiter shared by every caller in the
//! process, created on first use with the default settings.
//!
//! ```text
//!     request_limiter() ──► RateLimiter (8 rps, burst 15)
//!     request_queue()   ──► RequestQueue (100ms spacing)
//!
//!     set_request_*()  replace the instance for subsequent lookups
//!     reset()          drop both; the next lookup builds fresh defaults
//! ```
//!
//! Handles already returned keep pointing at the instance they were
//! created from.

use super::{
    config::{QueueConfig, RateLimiterConfig},
    limiter::RateLimiter,
    queue::RequestQueue,
};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

static REQUEST_QUEUE: RwLock<Option<RequestQueue>> = RwLock::new(None);
static REQUEST_LIMITER: RwLock<Option<Arc<RateLimiter>>> = RwLock::new(None);

fn get_or_init<T: Clone>(slot: &RwLock<Option<T>>, init: impl FnOnce() -> T) -> T {
    if let Some(existing) = slot.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
        return existing.clone();
    }
    let mut guard = slot.write().unwrap_or_else(PoisonError::into_inner);
    guard.get_or_insert_with(init).clone()
}

/// Process-wide request queue (100ms minimum spacing).
pub fn request_queue() -> RequestQueue {
    get_or_init(&REQUEST_QUEUE, || {
        debug!("creating process-wide request queue");
        RequestQueue::with_config(QueueConfig::default())
    })
}

/// Process-wide rate limiter (8 requests per second, burst of 15).
pub fn request_limiter() -> Arc<RateLimiter> {
    get_or_init(&REQUEST_LIMITER, || {
        debug!("creating process-wide rate limiter");
        Arc::new(RateLimiter::with_config(RateLimiterConfig::default()))
    })
}

/// Replaces the process-wide request queue.
pub fn set_request_queue(queue: RequestQueue) {
    *REQUEST_QUEUE.write().unwrap_or_else(PoisonError::into_inner) = Some(queue);
}

/// Replaces the process-wide rate limiter.
pub fn set_request_limiter(limiter: Arc<RateLimiter>) {
    *REQUEST_LIMITER.write().unwrap_or_else(PoisonError::into_inner) = Some(limiter);
}

/// Forgets both process-wide instances.
pub fn reset() {
    *REQUEST_QUEUE.write().unwrap_or_else(PoisonError::into_inner) = None;
    *REQUEST_LIMITER.write().unwrap_or_else(PoisonError::into_inner) = None;
    info!("Process-wide request queue and rate limiter reset");
}
