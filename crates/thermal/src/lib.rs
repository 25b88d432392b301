//! # Thermal Crate
//!
//! `thermal` provides the temperature side of a pellet-grill controller:
//!
//! - **Probe models**: convert voltage-divider readings to temperature via the
//!   Steinhart–Hart equation, fit coefficients from calibration points, and
//!   invert the model for resistance-based probe tuning.
//! - **Temperature queues**: bounded rolling averages that smooth ADC noise and
//!   shed implausible samples from open or shorted probes.
//! - **Cycle-ratio PID**: a proportional-band PID controller whose output is
//!   the fraction of the auger cycle during which pellets are fed.
//! - **Safety envelope**: pure checks for the startup-temperature floor and the
//!   maximum grill temperature, returning verdicts the control loop acts on.
//!
//! The crate holds no I/O and no clock of its own; callers supply samples and
//! timestamps, which keeps every component deterministic under test.

pub mod pid;
pub mod probe;
pub mod queue;
pub mod safety;

// Re-export key types
pub use pid::{CycleRatioPid, FanCurve};
pub use probe::{ProbeProfile, SteinhartHart, Units};
pub use queue::TempQueue;
pub use safety::{startup_floor, SafetyEnvelope, SafetyVerdict};
