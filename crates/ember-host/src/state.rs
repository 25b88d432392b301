//! Live controller state shared with external collaborators.
//!
//! The control document is the contract between the control loop and the web
//! layer: collaborators mutate it (through the store) and raise `updated`;
//! the loop observes the flag within one loop period and drains. The mode is
//! an exhaustive enum rather than a free-form string, so an impossible mode
//! cannot be requested.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Grill operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    #[default]
    Stop,
    Startup,
    Smoke,
    Hold,
    Shutdown,
    Reignite,
    Monitor,
    Manual,
    Error,
}

impl Mode {
    /// Modes in which a fire is (or should be) burning. Probe- and
    /// timer-triggered shutdowns only apply while one of these is running.
    pub fn is_active(self) -> bool {
        matches!(self, Mode::Startup | Mode::Smoke | Mode::Hold | Mode::Reignite)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Stop => "Stop",
            Mode::Startup => "Startup",
            Mode::Smoke => "Smoke",
            Mode::Hold => "Hold",
            Mode::Shutdown => "Shutdown",
            Mode::Reignite => "Reignite",
            Mode::Monitor => "Monitor",
            Mode::Manual => "Manual",
            Mode::Error => "Error",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SetPoints {
    pub grill: f64,
    pub probe1: f64,
    pub probe2: f64,
}

/// Armed notification thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotifyReq {
    pub grill: bool,
    pub probe1: bool,
    pub probe2: bool,
    pub timer: bool,
}

/// Post-trigger actions for armed thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotifyData {
    pub p1_shutdown: bool,
    pub p2_shutdown: bool,
    pub timer_shutdown: bool,
}

/// Cook timer, epoch seconds. `end > start >= 0` while armed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Timer {
    pub start: f64,
    pub end: f64,
    pub paused: f64,
}

/// Safety bookkeeping for the cook in progress.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyState {
    /// Floor recorded during Startup; dropping below it means flame-out.
    pub startup_temp: f64,
    /// Averaged grill temperature when Startup ended.
    pub after_start_temp: f64,
    /// Re-ignition attempts remaining; reset only by an explicit Stop.
    pub reignite_retries: u8,
    /// Mode to resume after a successful re-ignite.
    pub reignite_last_state: Mode,
}

impl Default for SafetyState {
    fn default() -> Self {
        Self {
            startup_temp: 0.0,
            after_start_temp: 0.0,
            reignite_retries: 1,
            reignite_last_state: Mode::Smoke,
        }
    }
}

/// Requested actuator states for Manual mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ManualState {
    /// Set by a collaborator when the fields below changed.
    pub change: bool,
    pub fan: bool,
    pub auger: bool,
    pub igniter: bool,
    pub power: bool,
    /// Fan PWM duty to apply, if any.
    pub pwm: Option<u8>,
}

/// The shared control document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Control {
    pub mode: Mode,
    /// Raised by collaborators to request a mode switch; cleared by the
    /// orchestrator when it dispatches.
    pub updated: bool,
    pub setpoints: SetPoints,
    pub notify_req: NotifyReq,
    pub notify_data: NotifyData,
    pub timer: Timer,
    pub safety: SafetyState,
    pub manual: ManualState,
    pub s_plus: bool,
    pub hopper_check: bool,
    pub probe_profile_update: bool,
    pub tuning_mode: bool,
}

/// Pellet state. Inventory bookkeeping lives with the web layer; the control
/// loop only maintains the measured hopper level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PelletDb {
    pub current: CurrentPellets,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentPellets {
    pub hopper_level: f64,
}

impl Default for CurrentPellets {
    fn default() -> Self {
        Self {
            hopper_level: 100.0,
        }
    }
}

/// One history record, appended every 3 seconds while a mode loop runs.
/// Resistances are recorded only in tuning mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub ts: f64,
    pub grill_temp: f64,
    pub grill_setpoint: f64,
    pub probe1_temp: f64,
    pub probe1_setpoint: f64,
    pub probe2_temp: f64,
    pub probe2_setpoint: f64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub grill_resistance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub probe1_resistance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub probe2_resistance: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_survives_json_round_trip() {
        let mut control = Control::default();
        control.mode = Mode::Hold;
        control.setpoints.grill = 225.0;
        control.notify_req.probe1 = true;
        control.notify_data.p1_shutdown = true;
        control.manual.pwm = Some(40);

        let json = serde_json::to_string(&control).unwrap();
        let back: Control = serde_json::from_str(&json).unwrap();
        assert_eq!(control, back);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let result = serde_json::from_str::<Control>(r#"{"mode": "Turbo"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn active_modes_gate_auto_shutdown() {
        assert!(Mode::Smoke.is_active());
        assert!(Mode::Startup.is_active());
        assert!(!Mode::Monitor.is_active());
        assert!(!Mode::Stop.is_active());
    }
}
