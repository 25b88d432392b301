//! Persisted controller settings.
//!
//! Settings live in the shared-state store as a JSON document that the web
//! layer edits. Every field carries a serde default so partial documents from
//! older collaborators still load; the controller re-reads the document when
//! a collaborator raises `probe_profile_update` or between mode dispatches.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thermal::probe::{ProbeProfile, Units};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub globals: Globals,
    pub cycle_data: CycleData,
    pub smoke_plus: SmokePlus,
    pub safety: SafetySettings,
    pub pellet_level: PelletLevel,
    pub probes: ProbeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Globals {
    pub units: Units,
    pub debug_mode: bool,
    /// How long Shutdown keeps the fan running, seconds.
    pub shutdown_timer: f64,
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            units: Units::Fahrenheit,
            debug_mode: false,
            shutdown_timer: 60.0,
        }
    }
}

/// Which fan-duty source Hold mode uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FanCurveMode {
    /// Fixed table over the current cycle ratio.
    #[default]
    Stepwise,
    /// The PID's rate-limited linear curve over the recent-ratio average.
    Pid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleData {
    /// P-mode: each step adds 10 s of auger off time in Smoke and Startup.
    pub p_mode: u8,
    /// Auger cycle period in Hold, seconds.
    pub hold_cycle_time: f64,
    /// Auger on time in Smoke and Startup, seconds.
    pub smoke_cycle_time: f64,
    /// Proportional band, degrees.
    pub pb: f64,
    /// Integral time, seconds.
    pub ti: f64,
    /// Derivative time, seconds.
    pub td: f64,
    /// Cycle ratio at zero error.
    pub center: f64,
    pub u_min: f64,
    pub u_max: f64,
    /// Run a 1-second first Hold cycle so the PID output takes effect
    /// immediately instead of after a full period at `u_min`.
    pub fast_first_cycle: bool,
    pub fan_curve: FanCurveMode,
}

impl Default for CycleData {
    fn default() -> Self {
        Self {
            p_mode: 2,
            hold_cycle_time: 20.0,
            smoke_cycle_time: 15.0,
            pb: 60.0,
            ti: 180.0,
            td: 45.0,
            center: 0.5,
            u_min: 0.15,
            u_max: 1.0,
            fast_first_cycle: true,
            fan_curve: FanCurveMode::Stepwise,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmokePlus {
    pub enabled: bool,
    /// Below this temperature the fan runs steadily instead of cycling.
    pub min_temp: f64,
    /// Above this temperature the fan runs steadily instead of cycling.
    pub max_temp: f64,
    /// Full fan on/off period while cycling, seconds.
    pub cycle: f64,
    /// Duty applied when the fan is forced on at the band edges.
    pub duty_cycle: u8,
    pub fan_ramp: bool,
    pub on_time: f64,
    pub off_time: f64,
}

impl Default for SmokePlus {
    fn default() -> Self {
        Self {
            enabled: true,
            min_temp: 160.0,
            max_temp: 220.0,
            cycle: 10.0,
            duty_cycle: 75,
            fan_ramp: false,
            on_time: 5.0,
            off_time: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetySettings {
    pub min_startup_temp: f64,
    pub max_startup_temp: f64,
    pub max_temp: f64,
    pub reignite_retries: u8,
    /// Fraction of the averaged grill temperature used as the startup floor.
    pub startup_scale: f64,
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self {
            min_startup_temp: 75.0,
            max_startup_temp: 100.0,
            max_temp: 550.0,
            reignite_retries: 1,
            startup_scale: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PelletLevel {
    pub warning_enabled: bool,
    /// Hopper percentage at or below which the low-pellet warning fires.
    pub warning_level: f64,
}

impl Default for PelletLevel {
    fn default() -> Self {
        Self {
            warning_enabled: true,
            warning_level: 25.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// Profile ids selected for each port.
    pub grill: String,
    pub probe1: String,
    pub probe2: String,
    pub profiles: BTreeMap<String, ProbeProfile>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "ntc100k_b3950".to_string(),
            ProbeProfile {
                vs: 3.28,
                rd: 10_000.0,
                a: 7.3431401e-4,
                b: 2.1574370e-4,
                c: 9.5156860e-8,
                name: "100K NTC (B3950)".to_string(),
            },
        );
        Self {
            grill: "ntc100k_b3950".to_string(),
            probe1: "ntc100k_b3950".to_string(),
            probe2: "ntc100k_b3950".to_string(),
            profiles,
        }
    }
}

impl ProbeSettings {
    /// Resolves the selected profile for a port, falling back to the default
    /// profile when the id is unknown (e.g. after a profile was deleted).
    fn resolve(&self, id: &str) -> ProbeProfile {
        self.profiles
            .get(id)
            .cloned()
            .unwrap_or_else(|| ProbeSettings::default().profiles["ntc100k_b3950"].clone())
    }

    /// The (grill, probe1, probe2) profiles currently selected.
    pub fn selected(&self) -> (ProbeProfile, ProbeProfile, ProbeProfile) {
        (
            self.resolve(&self.grill),
            self.resolve(&self.probe1),
            self.resolve(&self.probe2),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_loads_with_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"cycle_data": {"pb": 80.0}}"#).unwrap();
        assert_eq!(settings.cycle_data.pb, 80.0);
        assert_eq!(settings.cycle_data.ti, 180.0);
        assert_eq!(settings.safety.max_temp, 550.0);
        assert_eq!(settings.globals.units, Units::Fahrenheit);
    }

    #[test]
    fn unknown_probe_profile_falls_back() {
        let mut settings = Settings::default();
        settings.probes.grill = "deleted_profile".to_string();
        let (grill, _, _) = settings.probes.selected();
        assert_eq!(grill.rd, 10_000.0);
    }
}
