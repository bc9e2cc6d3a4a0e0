//! Time source for the scheduler.
//!
//! Everything that reads the wall clock or sleeps goes through [`Clock`], so
//! window arithmetic and pacing can be exercised with [`MockClock`] without
//! waiting in real time.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Wall clock plus sleeping.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

/// Converts a std duration to a chrono delta, saturating on overflow.
#[must_use]
pub fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Real clock backed by `Utc::now()` and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}

#[derive(Debug)]
struct MockState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

/// Controllable clock.
///
/// `sleep` returns immediately after advancing virtual time by the requested
/// duration, and records it. Clones share the same time.
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<Mutex<MockState>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                now: start,
                sleeps: Vec::new(),
            })),
        }
    }

    /// Advance the clock by a duration without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now += to_delta(duration);
    }

    /// Set the clock to a specific instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now = instant;
    }

    /// Every duration passed to `sleep` so far, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sleeps
            .clone()
    }

    /// Total virtual time spent sleeping.
    #[must_use]
    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.now += to_delta(duration);
            state.sleeps.push(duration);
        }
        std::future::ready(())
    }
}
