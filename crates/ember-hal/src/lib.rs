//! # Ember HAL
//!
//! Capability traits between the control engine and the hardware. The engine
//! only ever speaks logical on/off; relay-board polarity, PWM plumbing and
//! chip-specific driver code live behind these traits. Concrete devices are
//! selected once at boot from the boot configuration.

pub mod clock;
pub mod relay;

pub use clock::{Clock, MonotonicClock};
pub use relay::{GpioBackend, InPins, OutPins, PinLevel, RelayPlatform, TriggerLevel};

use thermal::ProbeProfile;
use thiserror::Error;

/// Errors surfaced by hardware capability calls. Transient by default: the
/// control loop logs and retries on the next tick.
#[derive(Debug, Error)]
pub enum HalError {
    #[error("gpio operation failed on pin {pin}: {reason}")]
    Gpio { pin: u8, reason: String },
    #[error("adc read failed: {0}")]
    Adc(String),
    #[error("distance sensor read failed: {0}")]
    Distance(String),
    #[error("display unavailable: {0}")]
    Display(String),
}

/// Logical actuator state, already corrected for relay polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logical {
    On,
    Off,
}

impl Logical {
    pub fn is_on(self) -> bool {
        self == Logical::On
    }
}

/// Logical state of the four relay outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputState {
    pub power: Logical,
    pub auger: Logical,
    pub fan: Logical,
    pub igniter: Logical,
}

/// Position of the physical selector switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorSwitch {
    /// The controller drives the grill.
    Controller,
    /// The OEM controller drives the grill; we only observe.
    Oem,
}

/// One ADC sweep over all three probes: temperatures in the configured units
/// plus the raw thermistor resistances for the tuning flow. A failed
/// conversion (open or shorted probe) reads as NaN and is shed by the
/// temperature queues.
#[derive(Debug, Clone, Copy)]
pub struct ProbeSample {
    pub grill_temp: f64,
    pub probe1_temp: f64,
    pub probe2_temp: f64,
    pub grill_resistance: f64,
    pub probe1_resistance: f64,
    pub probe2_resistance: f64,
}

/// Averaged temperatures and setpoints handed to the display and the history
/// recorder every tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProbeReadings {
    pub grill_temp: f64,
    pub grill_setpoint: f64,
    pub probe1_temp: f64,
    pub probe1_setpoint: f64,
    pub probe2_temp: f64,
    pub probe2_setpoint: f64,
    pub grill_resistance: f64,
    pub probe1_resistance: f64,
    pub probe2_resistance: f64,
}

/// Controller status handed to the display alongside the readings.
#[derive(Debug, Clone)]
pub struct StatusData {
    pub outputs: OutputState,
    pub mode: String,
    pub notify_grill: bool,
    pub notify_probe1: bool,
    pub notify_probe2: bool,
    pub notify_timer: bool,
    pub timer_start: f64,
    pub timer_end: f64,
    pub timer_paused: f64,
    pub smoke_plus: bool,
    pub hopper_level: f64,
    pub units: &'static str,
}

/// The grill platform: four relay outputs, the PWM combustion fan and the
/// selector switch input.
pub trait GrillPlatform {
    fn fan_on(&mut self) -> Result<(), HalError>;
    fn fan_off(&mut self) -> Result<(), HalError>;
    /// Flips the fan relay and alternates the PWM duty between a high and a
    /// low step, which is what produces the Smoke-Plus surge.
    fn fan_toggle(&mut self) -> Result<(), HalError>;
    fn auger_on(&mut self) -> Result<(), HalError>;
    fn auger_off(&mut self) -> Result<(), HalError>;
    fn igniter_on(&mut self) -> Result<(), HalError>;
    fn igniter_off(&mut self) -> Result<(), HalError>;
    fn power_on(&mut self) -> Result<(), HalError>;
    fn power_off(&mut self) -> Result<(), HalError>;
    /// Sets the fan PWM duty cycle, 0..=100 percent.
    fn fan_duty_cycle(&mut self, percent: u8) -> Result<(), HalError>;
    /// Logical (polarity-corrected) state of the four outputs.
    fn output_status(&mut self) -> Result<OutputState, HalError>;
    fn input_status(&mut self) -> Result<SelectorSwitch, HalError>;
}

/// The probe ADC: applies calibration profiles and reads all three ports.
pub trait ProbeSampler {
    fn set_profiles(
        &mut self,
        grill: ProbeProfile,
        probe1: ProbeProfile,
        probe2: ProbeProfile,
    );
    fn read_all(&mut self) -> Result<ProbeSample, HalError>;
}

/// Hopper fill-level sensor.
pub trait DistanceSensor {
    /// Current hopper level in percent.
    fn hopper_level(&mut self) -> Result<f64, HalError>;
}

/// The status display attached to the grill.
pub trait StatusDisplay {
    fn status(&mut self, readings: &ProbeReadings, status: &StatusData) -> Result<(), HalError>;
    fn text(&mut self, message: &str) -> Result<(), HalError>;
    /// Polls for button or encoder input between ticks.
    fn poll_events(&mut self);
}
