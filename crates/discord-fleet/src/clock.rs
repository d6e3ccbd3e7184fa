//! Clock abstraction so loop cadence and expiry checks can be driven in tests.
//!
//! - `SystemClock`: delegates to `tokio::time` and `chrono::Utc`
//! - `MockClock`: manually advanced, `sleep()` only records the request

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Abstraction over the system clock.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic instant, used for request latency.
    fn now(&self) -> Instant;

    /// Wall-clock time, used to compare entitlement expiries.
    fn utc_now(&self) -> DateTime<Utc>;

    /// Sleep for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Live implementation: real tokio timers and the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-support"))]
mod mock {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{DateTime, Utc};
    use tokio::time::Instant;

    use super::Clock;

    /// Mock clock for unit tests.
    /// - `now()` / `utc_now()` move only when `advance()` is called
    /// - `sleep()` returns immediately and records the requested duration
    #[derive(Clone)]
    pub struct MockClock {
        inner: Arc<Mutex<MockClockInner>>,
    }

    struct MockClockInner {
        instant: Instant,
        utc: DateTime<Utc>,
        sleeps: Vec<Duration>,
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::at(Utc::now())
        }

        /// Create a mock clock whose wall-clock reading starts at `utc`.
        pub fn at(utc: DateTime<Utc>) -> Self {
            Self {
                inner: Arc::new(Mutex::new(MockClockInner {
                    instant: Instant::now(),
                    utc,
                    sleeps: Vec::new(),
                })),
            }
        }

        /// Advance both the monotonic and the wall-clock reading.
        pub fn advance(&self, duration: Duration) {
            let mut inner = self.inner.lock().unwrap();
            inner.instant += duration;
            inner.utc += chrono::Duration::from_std(duration).unwrap();
        }

        /// Durations passed to `sleep()` so far, in call order.
        pub fn sleeps(&self) -> Vec<Duration> {
            self.inner.lock().unwrap().sleeps.clone()
        }
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            self.inner.lock().unwrap().instant
        }

        fn utc_now(&self) -> DateTime<Utc> {
            self.inner.lock().unwrap().utc
        }

        async fn sleep(&self, duration: Duration) {
            self.inner.lock().unwrap().sleeps.push(duration);
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_clock_advance_moves_both_readings() {
        let start = Utc::now();
        let clock = MockClock::at(start);
        let before = clock.now();

        clock.advance(Duration::from_millis(750));

        assert_eq!(clock.now() - before, Duration::from_millis(750));
        assert_eq!(
            clock.utc_now() - start,
            chrono::Duration::milliseconds(750)
        );
    }

    #[tokio::test]
    async fn test_mock_clock_records_sleeps() {
        let clock = MockClock::new();
        clock.sleep(Duration::from_secs(60)).await;
        clock.sleep(Duration::from_secs(5)).await;
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(60), Duration::from_secs(5)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_system_clock_sleep_uses_tokio_time() {
        let clock = SystemClock;
        let start = clock.now();
        clock.sleep(Duration::from_secs(900)).await;
        assert!(clock.now() - start >= Duration::from_secs(900));
    }
}
