//! Time source abstraction.
//!
//! All interval arithmetic in the control loop runs on the monotonic clock;
//! the wall clock only feeds the user-facing cook timer and history
//! timestamps. Putting both behind a trait lets the test harness drive the
//! loop through simulated hours without sleeping.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    /// Monotonic now, for interval checks.
    fn monotonic(&self) -> Instant;
    /// Wall-clock now as epoch seconds, for the cook timer and history.
    fn wall_epoch(&self) -> f64;
    /// Suspends the control thread for one tick.
    fn sleep(&self, duration: Duration);
}

/// Production clock: real time, real sleeps.
#[derive(Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn wall_epoch(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}
