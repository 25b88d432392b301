//! Cycle-ratio PID controller.
//!
//! Standard-form PID on the proportional band:
//!
//! ```text
//! Kp = -1/PB      Ki = Kp/Ti      Kd = Kp*Td
//! u  = Kp*e + center + Ki*∫e dt + Kd*de/dt
//! ```
//!
//! The gain is negative: the error is `current - setpoint`, so a grill running
//! hot pushes the output down. `u` is the auger cycle ratio, clamped to
//! `[u_min, u_max]`.
//!
//! Anti-windup undoes the tick's integral accumulation whenever the output
//! clamps. Clamping low with a small error (≤ 10 degrees) only undoes 70 % of
//! the step: the remaining drift lets the integral pull the output below what
//! the `center` term alone would produce, so a low setpoint is reachable from
//! a hot grill without bouncing off `u_min`.

use std::collections::VecDeque;
use std::time::Instant;

/// Error magnitude below which a low clamp still accumulates 30 % of the step.
const LOW_CLAMP_FULL_UNDO_ERROR: f64 = 10.0;
/// Fraction of the integral step undone on a low clamp with small error.
const LOW_CLAMP_PARTIAL_UNDO: f64 = 0.7;
/// Integral deadband: accumulate only when `|e|` exceeds this.
const INTEGRAL_DEADBAND: f64 = 0.0;
/// Maximum fan-duty change per `compute_fan_speed` call, in percent.
const FAN_STEP_LIMIT: f64 = 5.0;
/// Span of the recent-ratio window in seconds.
const RECENT_WINDOW_SECS: f64 = 120.0;

/// Linear fan-duty mapping from the cycle-ratio range onto a duty range.
#[derive(Debug, Clone, Copy)]
pub struct FanCurve {
    /// Duty applied at `u_min`.
    pub min_fan: f64,
    /// Duty applied at `u_max`.
    pub max_fan: f64,
}

impl Default for FanCurve {
    fn default() -> Self {
        Self {
            min_fan: 55.0,
            max_fan: 95.0,
        }
    }
}

/// PID controller producing the auger cycle ratio for Hold mode.
#[derive(Debug, Clone)]
pub struct CycleRatioPid {
    kp: f64,
    ki: f64,
    kd: f64,
    center: f64,
    u_min: f64,
    u_max: f64,
    setpoint: f64,

    integral: f64,
    error: f64,
    last: Option<f64>,
    last_update: Option<Instant>,
    p_term: f64,
    i_term: f64,
    d_term: f64,

    recent_ratios: VecDeque<f64>,
    window: usize,
    fan: FanCurve,
    last_fan: f64,
}

impl CycleRatioPid {
    /// Creates a controller from proportional-band tunings. `pb`, `ti` and
    /// `td` must be positive; `hold_cycle_time` sizes the recent-ratio window.
    pub fn new(
        pb: f64,
        ti: f64,
        td: f64,
        center: f64,
        u_min: f64,
        u_max: f64,
        hold_cycle_time: f64,
        fan: FanCurve,
    ) -> Self {
        let (kp, ki, kd) = Self::gains(pb, ti, td);
        let window = ((RECENT_WINDOW_SECS / hold_cycle_time.max(1.0)) as usize).max(1);
        Self {
            kp,
            ki,
            kd,
            center,
            u_min,
            u_max,
            setpoint: 0.0,
            integral: 0.0,
            error: 0.0,
            last: None,
            last_update: None,
            p_term: 0.0,
            i_term: 0.0,
            d_term: 0.0,
            recent_ratios: VecDeque::from(vec![u_min; window]),
            window,
            fan,
            last_fan: fan.min_fan,
        }
    }

    fn gains(pb: f64, ti: f64, td: f64) -> (f64, f64, f64) {
        let kp = -1.0 / pb;
        (kp, kp / ti, kp * td)
    }

    /// Retargets the controller and resets the integral, derivative and error
    /// history. `now` anchors the next integration interval.
    pub fn set_target(&mut self, setpoint: f64, now: Instant) {
        self.setpoint = setpoint;
        self.error = 0.0;
        self.integral = 0.0;
        self.last = None;
        self.last_update = Some(now);
    }

    /// Replaces the tunings in place; integral state is preserved.
    pub fn set_gains(&mut self, pb: f64, ti: f64, td: f64) {
        let (kp, ki, kd) = Self::gains(pb, ti, td);
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    /// Computes the next cycle ratio from the averaged grill temperature.
    pub fn update(&mut self, current: f64, now: Instant) -> f64 {
        // Seed the derivative so the first update cannot spike.
        let last = self.last.unwrap_or(current);
        let dt = match self.last_update {
            Some(prev) => now.saturating_duration_since(prev).as_secs_f64().max(1e-6),
            None => 1e-6,
        };

        let error = current - self.setpoint;
        self.p_term = self.kp * error + self.center;

        if error.abs() > INTEGRAL_DEADBAND {
            self.integral += error * dt;
        }
        self.i_term = self.ki * self.integral;

        self.d_term = self.kd * (current - last) / dt;

        let mut u = self.p_term + self.i_term + self.d_term;
        if u > self.u_max {
            self.integral -= error * dt;
            u = self.u_max;
        } else if u < self.u_min {
            if error > LOW_CLAMP_FULL_UNDO_ERROR {
                self.integral -= error * dt;
            } else {
                self.integral -= error * dt * LOW_CLAMP_PARTIAL_UNDO;
            }
            u = self.u_min;
        }

        self.error = error;
        self.last = Some(current);
        self.last_update = Some(now);

        if self.recent_ratios.len() == self.window {
            self.recent_ratios.pop_front();
        }
        self.recent_ratios.push_back(u);

        u
    }

    /// Maps the recent-ratio window average onto the fan curve, limited to
    /// [`FAN_STEP_LIMIT`] percent of change per call.
    pub fn compute_fan_speed(&mut self) -> f64 {
        let avg =
            self.recent_ratios.iter().sum::<f64>() / self.recent_ratios.len().max(1) as f64;
        let span = self.u_max - self.u_min;
        let t = if span > 0.0 {
            ((avg - self.u_min) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let target = self.fan.min_fan + t * (self.fan.max_fan - self.fan.min_fan);

        let step = (target - self.last_fan).clamp(-FAN_STEP_LIMIT, FAN_STEP_LIMIT);
        self.last_fan += step;
        self.last_fan
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    /// `(Kp, Ki, Kd)`.
    pub fn gains_k(&self) -> (f64, f64, f64) {
        (self.kp, self.ki, self.kd)
    }

    /// The proportional, integral and derivative contributions of the last
    /// update, for debug logging.
    pub fn terms(&self) -> (f64, f64, f64) {
        (self.p_term, self.i_term, self.d_term)
    }
}
