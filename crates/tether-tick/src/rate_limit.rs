//! Elapsed-time rate limiting.

use std::time::Duration;

use tokio::time::Instant;

/// Allows at most one action per `interval`.
///
/// The decision depends only on time elapsed since the last allowed
/// action, never on how often [`try_acquire`](Self::try_acquire) is
/// called. Over any window of length `T` at most `T / interval + 1`
/// acquisitions succeed.
///
/// ```rust
/// use std::time::Duration;
/// use tether_tick::RateLimiter;
/// use tokio::time::Instant;
///
/// let mut limiter = RateLimiter::new(Duration::from_millis(50));
/// let t0 = Instant::now();
/// assert!(limiter.try_acquire_at(t0));
/// assert!(!limiter.try_acquire_at(t0 + Duration::from_millis(10)));
/// assert!(limiter.try_acquire_at(t0 + Duration::from_millis(50)));
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` (and starts a new interval) if an action is allowed now.
    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Like [`try_acquire`](Self::try_acquire) with an explicit clock reading.
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Forgets the last action; the next call is allowed.
    pub fn reset(&mut self) {
        self.last = None;
    }
}
