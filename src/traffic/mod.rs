//! # Traffic Module
//!
//! Internal implementation of the request-shaping primitives. Each submodule
//! owns one concern; they share only the clock, configuration and error types.
//!
//! ## Module Structure
//!
//! ```text
//!     traffic/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── clock.rs        (Injectable time source)
//!     ├── config.rs       (Limiter/queue settings and defaults)
//!     ├── error.rs        (Error types)
//!     ├── dedupe.rs       (In-flight request sharing)
//!     ├── timing.rs       (Throttle, async throttle, debounce)
//!     ├── queue.rs        (Serialized request queue)
//!     ├── limiter.rs      (Token bucket rate limiter)
//!     ├── metrics.rs      (Limiter counters and health)
//!     └── defaults.rs     (Process-wide queue and limiter)
//! ```
//!
//! ## How a Request Flows
//!
//! The primitives are independent; callers compose them in whatever order
//! suits the request.
//!
//! ```text
//!     caller
//!       │
//!       ▼
//!     ┌─────────────┐
//!     │ Deduplicator│ ◄── identical in-flight work is shared
//!     └──────┬──────┘
//!            ▼
//!     ┌─────────────┐
//!     │ RequestQueue│ ◄── one at a time, spaced by min_interval
//!     └──────┬──────┘
//!            ▼
//!     ┌─────────────┐
//!     │ RateLimiter │ ◄── sustained rate + burst cap
//!     └──────┬──────┘
//!            ▼
//!         network
//! ```

mod clock;
mod config;
mod dedupe;
pub mod defaults;
mod error;
mod limiter;
mod metrics;
mod queue;
mod timing;

/// Time sources
pub use clock::{tokio_clock, Clock, ManualClock, SharedClock, TokioClock};

/// Settings and process-wide constants
pub use config::{
    QueueConfig, RateLimiterConfig, BACKEND_REQUESTS_PER_MINUTE, DEFAULT_BURST_SIZE,
    DEFAULT_MIN_INTERVAL, DEFAULT_REQUESTS_PER_SECOND,
};

/// Request deduplication
pub use dedupe::{DedupeStats, Deduplicator, SharedRequest};

/// Errors
pub use error::{AcquireError, ConfigError, QueueError};

/// Token bucket limiter
pub use limiter::RateLimiter;

/// Limiter observability
pub use metrics::{HealthStatus, RateLimiterMetrics};

/// Serialized queue
pub use queue::{QueueStats, RequestQueue};

/// Rate-shaping wrappers
pub use timing::{AsyncThrottle, Debouncer, SharedCall, Throttle};
