//! Error types.
//!
//! The primitives never interpret failures of the operations they wrap. The
//! only errors manufactured here are configuration errors, the queue's
//! cleared and aborted rejections, and the ways a bounded `acquire` gives up.

use thiserror::Error;

/// Invalid configuration passed to a constructor or builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The sustained rate must allow at least one request per second.
    #[error("requests_per_second must be greater than 0")]
    ZeroRate,
    /// The bucket must hold at least one token.
    #[error("burst_size must be greater than 0")]
    ZeroBurst,
}

/// Failure of an operation submitted to a [`RequestQueue`](crate::RequestQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError<E> {
    /// The item was discarded by `clear()` before it was dispatched.
    #[error("queue cleared")]
    Cleared,
    /// The operation never reported a result: it panicked, or the runtime
    /// shut down while it was queued.
    #[error("queued operation aborted")]
    Aborted,
    /// The operation ran and failed with its own error.
    #[error("queued operation failed: {0}")]
    Failed(E),
}

impl<E> QueueError<E> {
    /// Returns `true` for the synthetic queue-cleared rejection.
    pub fn is_cleared(&self) -> bool {
        matches!(self, Self::Cleared)
    }

    /// Returns `true` if the operation panicked or was dropped mid-flight.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Returns the operation's own error, if it ran and failed.
    pub fn into_failure(self) -> Option<E> {
        match self {
            Self::Cleared | Self::Aborted => None,
            Self::Failed(err) => Some(err),
        }
    }
}

/// Reasons a bounded token acquisition gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquireError {
    /// The deadline passed before a token became available.
    #[error("timed out waiting for a rate limiter token")]
    TimedOut,
    /// The caller's cancellation signal fired first.
    #[error("token acquisition cancelled")]
    Cancelled,
}
