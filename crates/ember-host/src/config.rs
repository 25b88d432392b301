//! Boot configuration.
//!
//! Everything that must be known before the store is readable: GPIO pin
//! assignment (BCM numbering), relay polarity and which device modules to
//! instantiate. INI format, edited by hand at install time; runtime tunables
//! live in the settings document instead.

use anyhow::{bail, Context, Result};
use configparser::ini::Ini;
use ember_hal::relay::{InPins, OutPins, TriggerLevel};
use std::path::Path;

/// Device module selection, resolved once at boot.
#[derive(Debug, Clone)]
pub struct Modules {
    pub platform: String,
    pub adc: String,
    pub display: String,
    pub distance: String,
}

impl Default for Modules {
    fn default() -> Self {
        Self {
            platform: "prototype".to_string(),
            adc: "prototype".to_string(),
            display: "prototype".to_string(),
            distance: "prototype".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BootConfig {
    pub outpins: OutPins,
    pub inpins: InPins,
    pub trigger: TriggerLevel,
    pub modules: Modules,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            outpins: OutPins {
                power: 18,
                auger: 4,
                fan: 15,
                igniter: 14,
                pwm: 13,
            },
            inpins: InPins { selector: 17 },
            trigger: TriggerLevel::ActiveLow,
            modules: Modules::default(),
        }
    }
}

impl BootConfig {
    /// Loads and parses the boot configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let mut ini = Ini::new();
        ini.load(path)
            .map_err(|e| anyhow::anyhow!(e))
            .with_context(|| format!("failed to load boot config {path:?}"))?;

        let pin = |key: &str| -> Result<u8> {
            let value = ini
                .getuint("pins", key)
                .map_err(|e| anyhow::anyhow!(e))?
                .with_context(|| format!("[pins] {key} not found"))?;
            if value > 27 {
                bail!("[pins] {key} = {value} is not a BCM pin");
            }
            Ok(value as u8)
        };

        let outpins = OutPins {
            power: pin("power")?,
            auger: pin("auger")?,
            fan: pin("fan")?,
            igniter: pin("igniter")?,
            pwm: pin("pwm")?,
        };
        let inpins = InPins {
            selector: pin("selector")?,
        };

        let trigger = match ini
            .get("platform", "trigger_level")
            .unwrap_or_else(|| "LOW".to_string())
            .to_uppercase()
            .as_str()
        {
            "LOW" => TriggerLevel::ActiveLow,
            "HIGH" => TriggerLevel::ActiveHigh,
            other => bail!("[platform] trigger_level must be LOW or HIGH, got {other}"),
        };

        let module = |key: &str| {
            ini.get("modules", key)
                .unwrap_or_else(|| "prototype".to_string())
        };
        let modules = Modules {
            platform: module("platform"),
            adc: module("adc"),
            display: module("display"),
            distance: module("distance"),
        };

        Ok(Self {
            outpins,
            inpins,
            trigger,
            modules,
        })
    }
}
