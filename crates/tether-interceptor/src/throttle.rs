//! Rate limit for mirrored publishes
//!
//! The window is measured from the last publish that actually went out, so a
//! steady stream of invocations faster than the interval yields one publish
//! per interval rather than none.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Per-process mirror throttle
#[derive(Debug)]
pub struct MirrorThrottle {
    interval: Duration,
    last_publish: Mutex<Option<Instant>>,
}

impl MirrorThrottle {
    /// Throttle allowing one publish per `interval`; zero never throttles
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_publish: Mutex::new(None),
        }
    }

    /// Claim the right to publish now
    ///
    /// Returns `false` when the previous publish is more recent than the interval.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last_publish.lock();
        if let Some(previous) = *last {
            if !self.interval.is_zero() && now.duration_since(previous) < self.interval {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Configured interval
    #[inline]
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_publish_always_allowed() {
        let throttle = MirrorThrottle::new(Duration::from_secs(3));
        assert!(throttle.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn skips_inside_window() {
        let throttle = MirrorThrottle::new(Duration::from_secs(3));
        assert!(throttle.try_acquire());

        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(!throttle.try_acquire());

        tokio::time::advance(Duration::from_millis(2000)).await;
        assert!(throttle.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn skipped_attempts_do_not_extend_window() {
        let throttle = MirrorThrottle::new(Duration::from_secs(3));
        assert!(throttle.try_acquire());
        for _ in 0..5 {
            tokio::time::advance(Duration::from_millis(500)).await;
            assert!(!throttle.try_acquire());
        }
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(throttle.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_throttles() {
        let throttle = MirrorThrottle::new(Duration::ZERO);
        assert!(throttle.try_acquire());
        assert!(throttle.try_acquire());
    }
}
