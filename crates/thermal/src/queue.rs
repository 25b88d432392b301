//! Rolling temperature averages.
//!
//! ADC samples arrive every control tick and are noisy; the control loop only
//! ever acts on a bounded rolling average. The queue also owns the sample
//! acceptance policy: non-finite or implausible readings (open or shorted
//! probe) never enter the window, and a warm queue sheds single samples that
//! jump more than 20 % from the current mean. Three consecutive off-mean
//! samples are treated as a genuine fast transient: the window is flushed and
//! restarted from the new reading, so the filter cannot lock a real change out.

use crate::probe::Units;
use std::collections::VecDeque;

/// How many consecutive out-of-band samples force the window to follow.
const REJECT_LIMIT: u32 = 3;
/// Fractional deviation from the warm mean beyond which a sample is shed.
const DRIFT_LIMIT: f64 = 0.20;

/// A bounded FIFO of accepted temperature samples.
#[derive(Debug, Clone)]
pub struct TempQueue {
    samples: VecDeque<f64>,
    capacity: usize,
    units: Units,
    rejected_run: u32,
    invalid_run: u32,
    degraded: bool,
}

impl TempQueue {
    /// Default window for the grill probe.
    pub const GRILL_WINDOW: usize = 30;
    /// Default window for the meat probes.
    pub const PROBE_WINDOW: usize = 10;

    pub fn new(capacity: usize, units: Units) -> Self {
        assert!(capacity > 0, "window must hold at least one sample");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            units,
            rejected_run: 0,
            invalid_run: 0,
            degraded: false,
        }
    }

    /// Offers a sample to the window. Implausible samples are dropped and,
    /// after [`REJECT_LIMIT`] in a row, mark the probe degraded; the average
    /// keeps reporting the last valid window contents throughout.
    pub fn enqueue(&mut self, sample: f64) {
        let (lo, hi) = self.units.plausible_range();
        if !sample.is_finite() || sample < lo || sample > hi {
            self.invalid_run += 1;
            if self.invalid_run >= REJECT_LIMIT {
                self.degraded = true;
            }
            return;
        }
        self.invalid_run = 0;
        self.degraded = false;

        if self.is_warm() {
            let mean = self.average();
            // Percent drift is meaningless around zero; only gate readings
            // with a usable reference mean.
            if mean.abs() > 1.0 && (sample - mean).abs() > mean.abs() * DRIFT_LIMIT {
                self.rejected_run += 1;
                if self.rejected_run >= REJECT_LIMIT {
                    self.samples.clear();
                    self.rejected_run = 0;
                    self.push(sample);
                }
                return;
            }
        }
        self.rejected_run = 0;
        self.push(sample);
    }

    /// Arithmetic mean of the accepted window, or 0 when nothing has been
    /// accepted yet.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// True once [`REJECT_LIMIT`] consecutive invalid samples have arrived;
    /// cleared by the next valid sample.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn is_warm(&self) -> bool {
        self.samples.len() == self.capacity
    }

    fn push(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
}
