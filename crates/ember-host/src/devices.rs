//! Device construction.
//!
//! Module names from the boot config are resolved to concrete devices
//! exactly once, here. This binary ships the `prototype` modules (the grill
//! simulator); hardware chip drivers plug in behind the same traits and get
//! their own match arms when they are linked in.

use crate::config::BootConfig;
use crate::cycle::Devices;
use crate::settings::Settings;
use anyhow::{bail, Context, Result};
use ember_hal::{
    Clock, DistanceSensor, GrillPlatform, HalError, ProbeReadings, ProbeSampler, RelayPlatform,
    StatusData, StatusDisplay,
};
use sim::{GrillSim, SimGpio, SimHopper, SimParams, SimProbes};
use std::sync::Arc;
use tracing::{debug, info};

/// The boxed device set owned by the process for its lifetime.
pub struct DeviceSet {
    pub platform: Box<dyn GrillPlatform>,
    pub probes: Box<dyn ProbeSampler>,
    pub distance: Box<dyn DistanceSensor>,
    pub display: Box<dyn StatusDisplay>,
}

impl DeviceSet {
    /// Borrows the set in the shape the mode loops take.
    pub fn as_devices(&mut self) -> Devices<'_> {
        Devices {
            platform: self.platform.as_mut(),
            probes: self.probes.as_mut(),
            distance: self.distance.as_mut(),
            display: self.display.as_mut(),
        }
    }
}

/// Builds the device set selected by the boot config.
pub fn build(boot: &BootConfig, settings: &Settings, clock: Arc<dyn Clock>) -> Result<DeviceSet> {
    for (name, module) in [
        ("platform", &boot.modules.platform),
        ("adc", &boot.modules.adc),
        ("display", &boot.modules.display),
        ("distance", &boot.modules.distance),
    ] {
        if module != "prototype" {
            bail!("{name} module '{module}' is not built into this binary");
        }
    }

    info!("using prototype (simulated) grill devices");
    let grill = GrillSim::new(SimParams::default());
    let gpio = SimGpio::new(grill.clone(), boot.outpins, boot.inpins, boot.trigger);
    let platform = RelayPlatform::new(gpio, boot.outpins, boot.inpins, boot.trigger)
        .context("platform initialisation failed")?;
    let probes = SimProbes::new(grill.clone(), clock, settings.globals.units);
    let distance = SimHopper::new(grill);

    Ok(DeviceSet {
        platform: Box::new(platform),
        probes: Box::new(probes),
        distance: Box::new(distance),
        display: Box::new(ConsoleDisplay::default()),
    })
}

/// Display module for headless installs: status refreshes go to the debug
/// log, messages to the info log.
#[derive(Default)]
pub struct ConsoleDisplay;

impl StatusDisplay for ConsoleDisplay {
    fn status(&mut self, readings: &ProbeReadings, status: &StatusData) -> Result<(), HalError> {
        debug!(
            mode = %status.mode,
            grill = readings.grill_temp,
            setpoint = readings.grill_setpoint,
            probe1 = readings.probe1_temp,
            probe2 = readings.probe2_temp,
            hopper = status.hopper_level,
            "status"
        );
        Ok(())
    }

    fn text(&mut self, message: &str) -> Result<(), HalError> {
        info!("display: {message}");
        Ok(())
    }

    fn poll_events(&mut self) {}
}
