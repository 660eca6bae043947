//! Wall-clock abstraction
//!
//! Scheduling decisions read the wall clock through [`Clock`] so tests can run
//! against a deterministic time source.

use std::time::Duration;

use tokio::time::{Instant, Sleep};

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current wall-clock time in epoch milliseconds
    fn current_time_millis(&self) -> i64;

    /// Sleep for `duration`. The returned future is cancel-safe.
    fn sleep(&self, duration: Duration) -> Sleep {
        tokio::time::sleep(duration)
    }

    /// Sleep until the wall-clock time `at_ms`; returns immediately if it has passed.
    fn sleep_until_millis(&self, at_ms: i64) -> Sleep {
        self.sleep(delay_until(self.current_time_millis(), at_ms))
    }
}

/// Delay from `now_ms` to `at_ms`, clamped to zero.
pub fn delay_until(now_ms: i64, at_ms: i64) -> Duration {
    Duration::from_millis(at_ms.saturating_sub(now_ms).max(0) as u64)
}

/// The system wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn current_time_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock anchored to a fixed epoch time that advances with tokio's clock.
///
/// Under a paused tokio runtime (`#[tokio::test(start_paused = true)]`) time only
/// moves when every task is idle or via `tokio::time::advance`, so wall-clock
/// readings and task sleeps stay in lockstep.
#[derive(Debug, Clone)]
pub struct FakeClock {
    base_ms: i64,
    origin: Instant,
}

impl FakeClock {
    pub fn new(base_ms: i64) -> Self {
        Self {
            base_ms,
            origin: Instant::now(),
        }
    }
}

impl Clock for FakeClock {
    fn current_time_millis(&self) -> i64 {
        self.base_ms + self.origin.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_until_clamps_past_deadlines() {
        assert_eq!(delay_until(1_000, 400), Duration::ZERO);
        assert_eq!(delay_until(1_000, 1_000), Duration::ZERO);
        assert_eq!(delay_until(1_000, 3_500), Duration::from_millis(2_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fake_clock_follows_paused_time() {
        let clock = FakeClock::new(10_000);
        assert_eq!(clock.current_time_millis(), 10_000);

        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.current_time_millis(), 100_000);

        clock.sleep_until_millis(160_000).await;
        assert_eq!(clock.current_time_millis(), 160_000);
    }
}
