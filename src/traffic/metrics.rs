//! # Rate Limiter Metrics
//!
//! Point-in-time snapshots of a [`RateLimiter`](crate::RateLimiter) and a
//! coarse health assessment, for dashboards and logs.
//!
//! ```text
//!     ┌─────────────────────────────────────┐
//!     │  Success Rate: 85%                  │
//!     │  Tokens: 3.40/15                    │
//!     │  Waits: 12 (1.5s total)             │
//!     │  Health: Healthy                    │
//!     └─────────────────────────────────────┘
//! ```

use std::fmt;
use std::time::Duration;

/// Snapshot of a rate limiter's counters and bucket state.
///
/// # Example
///
/// ```rust
/// use pacer::RateLimiter;
///
/// let limiter = RateLimiter::new(8);
/// limiter.try_acquire();
///
/// let metrics = limiter.metrics();
/// assert_eq!(metrics.total_acquired, 1);
/// println!("{}", metrics.summary());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimiterMetrics {
    /// Tokens handed out, through either `try_acquire` or `acquire`.
    pub total_acquired: u64,

    /// `try_acquire` calls that found the bucket empty.
    pub total_rejected: u64,

    /// Times an `acquire` caller had to sleep for a token.
    pub total_waits: u64,

    /// Accumulated time `acquire` callers spent sleeping.
    pub total_wait_time: Duration,

    /// Tokens available at the time of the snapshot (after refill).
    pub current_tokens: f64,

    /// Bucket capacity.
    pub bucket_size: f64,

    /// Rejections since the last successful acquisition.
    pub consecutive_rejections: u32,
}

impl RateLimiterMetrics {
    /// Fraction of attempts that got a token; 1.0 when there were none.
    #[inline]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            1.0
        } else {
            self.total_acquired as f64 / total as f64
        }
    }

    /// Fraction of attempts that were rejected.
    #[inline]
    pub fn rejection_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    /// Acquired plus rejected.
    #[inline]
    pub fn total_requests(&self) -> u64 {
        self.total_acquired + self.total_rejected
    }

    /// How much of the bucket is currently spent (0.0 full, 1.0 empty).
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.bucket_size <= 0.0 {
            0.0
        } else {
            1.0 - (self.current_tokens / self.bucket_size)
        }
    }

    /// Remaining capacity as a percentage.
    #[inline]
    pub fn availability_percentage(&self) -> f64 {
        if self.bucket_size <= 0.0 {
            0.0
        } else {
            (self.current_tokens / self.bucket_size) * 100.0
        }
    }

    /// Less than one whole token left, or fewer than half of attempts succeed.
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.current_tokens < 1.0 || self.success_rate() < 0.5
    }

    /// More than 10 rejections in a row, or over 30% rejected overall.
    #[inline]
    pub fn is_under_sustained_pressure(&self) -> bool {
        self.consecutive_rejections > 10 || self.rejection_rate() > 0.3
    }

    /// Mean sleep per waiting `acquire` call.
    pub fn average_wait(&self) -> Duration {
        if self.total_waits == 0 {
            Duration::ZERO
        } else {
            let nanos = self.total_wait_time.as_nanos() / u128::from(self.total_waits);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }

    /// Three-level health assessment.
    pub fn health_status(&self) -> HealthStatus {
        if self.is_under_sustained_pressure() {
            HealthStatus::Critical
        } else if self.is_under_pressure() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Multi-line human-readable report.
    pub fn summary(&self) -> String {
        format!(
            "RateLimiter Metrics:\n\
             ├─ Performance:\n\
             │  ├─ Success Rate: {:.2}%\n\
             │  ├─ Rejection Rate: {:.2}%\n\
             │  └─ Average Wait: {:?}\n\
             ├─ Capacity:\n\
             │  ├─ Available Tokens: {:.2}/{}\n\
             │  └─ Utilization: {:.2}%\n\
             ├─ Counters:\n\
             │  ├─ Total Acquired: {}\n\
             │  ├─ Total Rejected: {}\n\
             │  ├─ Total Waits: {}\n\
             │  └─ Consecutive Rejections: {}\n\
             └─ Health: {}",
            self.success_rate() * 100.0,
            self.rejection_rate() * 100.0,
            self.average_wait(),
            self.current_tokens,
            self.bucket_size,
            self.utilization() * 100.0,
            self.total_acquired,
            self.total_rejected,
            self.total_waits,
            self.consecutive_rejections,
            self.health_status(),
        )
    }
}

impl fmt::Display for RateLimiterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Health of a rate limiter as seen by its recent traffic.
///
/// ```text
///     Healthy ──────► tokens available, most attempts succeed
///        │
///     Degraded ─────► bucket drained or success rate below 50%
///        │
///     Critical ─────► long rejection streak or >30% rejected overall
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Callers are being slowed down but traffic is flowing.
    Degraded,
    /// Demand consistently exceeds the configured rate.
    Critical,
}

impl HealthStatus {
    /// Anything other than [`HealthStatus::Healthy`].
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Operator guidance for this status.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, widgets are being paced",
            Self::Critical => "Reduce polling frequency or raise the backend quota",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(acquired: u64, rejected: u64, tokens: f64, streak: u32) -> RateLimiterMetrics {
        RateLimiterMetrics {
            total_acquired: acquired,
            total_rejected: rejected,
            total_waits: 0,
            total_wait_time: Duration::ZERO,
            current_tokens: tokens,
            bucket_size: 15.0,
            consecutive_rejections: streak,
        }
    }

    #[test]
    fn test_rates() {
        let metrics = snapshot(80, 20, 7.5, 0);
        assert_eq!(metrics.success_rate(), 0.8);
        assert!((metrics.rejection_rate() - 0.2).abs() < 1e-9);
        assert_eq!(metrics.total_requests(), 100);
        assert_eq!(metrics.utilization(), 0.5);
        assert_eq!(metrics.availability_percentage(), 50.0);
    }

    #[test]
    fn test_health_levels() {
        assert_eq!(snapshot(10, 0, 5.0, 0).health_status(), HealthStatus::Healthy);
        assert_eq!(snapshot(10, 0, 0.4, 0).health_status(), HealthStatus::Degraded);
        assert_eq!(snapshot(10, 20, 0.0, 15).health_status(), HealthStatus::Critical);
    }

    #[test]
    fn test_empty_snapshot() {
        let metrics = snapshot(0, 0, 15.0, 0);
        assert_eq!(metrics.success_rate(), 1.0);
        assert_eq!(metrics.average_wait(), Duration::ZERO);
        assert!(!metrics.health_status().is_unhealthy());
    }

    #[test]
    fn test_average_wait() {
        let mut metrics = snapshot(4, 0, 0.0, 0);
        metrics.total_waits = 4;
        metrics.total_wait_time = Duration::from_millis(500);
        assert_eq!(metrics.average_wait(), Duration::from_millis(125));
    }

    #[test]
    fn test_average_wait_past_u32_waits() {
        let mut metrics = snapshot(0, 0, 0.0, 0);
        metrics.total_waits = 1 << 32;
        metrics.total_wait_time = Duration::from_millis(125) * (1 << 16) * (1 << 16);
        assert_eq!(metrics.average_wait(), Duration::from_millis(125));

        metrics.total_waits = u64::MAX;
        metrics.total_wait_time = Duration::from_secs(1);
        assert_eq!(metrics.average_wait(), Duration::ZERO);
    }

    #[test]
    fn test_summary_and_display() {
        let metrics = snapshot(3, 1, 2.0, 1);
        let summary = metrics.summary();
        assert!(summary.contains("Success Rate: 75.00%"));
        assert!(summary.contains("Available Tokens: 2.00/15"));
        assert_eq!(format!("{}", metrics), summary);
        assert!(HealthStatus::Critical.suggested_action().contains("polling"));
    }
}
