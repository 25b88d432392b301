//! Safety envelope checks.
//!
//! The control loop evaluates the envelope every tick while a fire should be
//! burning. The checks are pure: they look at the averaged grill temperature
//! and return a verdict; acting on it (mode transition, display, notification)
//! stays with the caller.

/// Outcome of an envelope evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyVerdict {
    /// Temperature is inside the envelope.
    Ok,
    /// The fire went out but re-ignition attempts remain. Carries the retry
    /// count to store back; it only ever decreases.
    Reignite { retries_left: u8 },
    /// The fire went out and no retries remain. The firepot may contain
    /// unburned pellets; the grill must stop feeding.
    StartupFailure,
    /// The grill exceeded the maximum temperature limit.
    OverTemp,
}

/// The temperature bounds in force for the current cook.
#[derive(Debug, Clone, Copy)]
pub struct SafetyEnvelope {
    /// Floor established during Startup; dropping below it means the fire is
    /// out.
    pub startup_temp: f64,
    /// Absolute ceiling from settings.
    pub max_temp: f64,
}

impl SafetyEnvelope {
    /// Evaluation for Smoke and Hold, where the fire must be self-sustaining.
    /// The under-temperature check wins over the ceiling check.
    pub fn check_work(&self, avg_grill: f64, reignite_retries: u8) -> SafetyVerdict {
        if avg_grill < self.startup_temp {
            if reignite_retries == 0 {
                SafetyVerdict::StartupFailure
            } else {
                SafetyVerdict::Reignite {
                    retries_left: reignite_retries - 1,
                }
            }
        } else if avg_grill > self.max_temp {
            SafetyVerdict::OverTemp
        } else {
            SafetyVerdict::Ok
        }
    }

    /// Evaluation for Monitor mode: the OEM controller owns the fire, so only
    /// the ceiling applies.
    pub fn check_monitor(&self, avg_grill: f64) -> SafetyVerdict {
        if avg_grill > self.max_temp {
            SafetyVerdict::OverTemp
        } else {
            SafetyVerdict::Ok
        }
    }
}

/// Computes the startup-temperature floor recorded at Startup entry:
/// `scale * avg_grill`, clamped into `[min_startup, max_startup]`. The scale
/// is a setting so a hot restart can be tuned without touching code.
pub fn startup_floor(avg_grill: f64, scale: f64, min_startup: f64, max_startup: f64) -> f64 {
    (avg_grill * scale).max(min_startup).min(max_startup)
}
