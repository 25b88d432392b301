//! Simulated clock: sleeping advances time instead of waiting for it.

use ember_hal::Clock;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Arbitrary but stable wall-clock origin for simulated runs.
const SIM_EPOCH: f64 = 1_700_000_000.0;

/// A clock whose time only moves when the control loop sleeps (or a test
/// calls [`SimClock::advance`]). Monotonic and wall time advance together.
pub struct SimClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl SimClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Moves simulated time forward without going through `sleep`.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    /// Seconds of simulated time elapsed since construction.
    pub fn elapsed(&self) -> f64 {
        self.offset.lock().as_secs_f64()
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn monotonic(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn wall_epoch(&self) -> f64 {
        SIM_EPOCH + self.offset.lock().as_secs_f64()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
