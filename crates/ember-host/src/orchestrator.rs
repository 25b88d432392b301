//! Top-level mode selection.
//!
//! The orchestrator owns the devices for the life of the process. It polls
//! the control document; when a collaborator (or a finishing mode) raises
//! `updated`, it clears the flag and hands the devices to the matching mode
//! loop. Startup and Reignite chain into the next cooking mode on
//! completion; Shutdown lands in Stop; Error and Stop idle until the user
//! acts.

use crate::cycle::{self, Devices};
use crate::notify::{NotifyEmitter, NotifyEvent};
use crate::state::{Control, Mode};
use crate::store::StateStore;
use anyhow::Result;
use ember_hal::{Clock, SelectorSwitch};
use std::time::Duration;
use tracing::{error, info, warn};

/// How often the idle orchestrator polls for `updated`.
const POLL: Duration = Duration::from_millis(100);

/// The mode entered when a startup phase completes without interruption.
/// Reignite resumes the cook it interrupted; a fresh Startup picks Hold when
/// a grill setpoint is armed and Smoke otherwise.
pub fn select_next_mode(finished: Mode, control: &Control) -> Mode {
    if finished == Mode::Reignite && control.safety.reignite_last_state == Mode::Hold {
        if control.setpoints.grill > 0.0 {
            return Mode::Hold;
        }
        return Mode::Smoke;
    }
    if finished == Mode::Reignite {
        return Mode::Smoke;
    }
    if control.setpoints.grill > 0.0 {
        Mode::Hold
    } else {
        Mode::Smoke
    }
}

/// Runs the controller until the process is terminated.
pub fn run(
    devices: &mut Devices,
    store: &StateStore,
    clock: &dyn Clock,
    emitter: &NotifyEmitter,
) -> Result<()> {
    // Master power follows the selector switch at boot.
    match devices.platform.input_status()? {
        SelectorSwitch::Controller => devices.platform.power_on()?,
        SelectorSwitch::Oem => devices.platform.power_off()?,
    }
    let _ = devices.display.text("Ready");

    loop {
        step(devices, store, clock, emitter)?;
        clock.sleep(POLL);
    }
}

/// One orchestrator poll: dispatches at most one requested mode.
pub fn step(
    devices: &mut Devices,
    store: &StateStore,
    clock: &dyn Clock,
    emitter: &NotifyEmitter,
) -> Result<()> {
    let control = match store.read_control() {
        Ok(control) => control,
        Err(e) => {
            warn!("control read failed while idle: {e}");
            return Ok(());
        }
    };
    if !control.updated {
        return Ok(());
    }
    let mode = control.mode;

    match mode {
        Mode::Stop => {
            // An explicit Stop is the one place the re-ignite budget resets.
            let retries = store
                .read_settings()
                .map(|s| s.safety.reignite_retries)
                .unwrap_or(crate::settings::SafetySettings::default().reignite_retries);
            if let Err(e) = store.update_control(|c| {
                c.updated = false;
                c.safety.reignite_retries = retries;
            }) {
                warn!("failed to acknowledge stop: {e}");
                return Ok(());
            }
            let _ = devices.platform.auger_off();
            let _ = devices.platform.igniter_off();
            let _ = devices.platform.fan_off();
            match devices.platform.input_status() {
                Ok(SelectorSwitch::Controller) => {
                    let _ = devices.platform.power_on();
                }
                Ok(SelectorSwitch::Oem) => {
                    let _ = devices.platform.power_off();
                }
                Err(e) => warn!("selector read failed while stopping: {e}"),
            }
            info!("stopped; idling");
        }
        Mode::Error => {
            if let Err(e) = store.update_control(|c| c.updated = false) {
                warn!("failed to acknowledge error state: {e}");
            }
            warn!("grill is in error state; waiting for user stop");
        }
        _ => {
            if mode == Mode::Hold && control.setpoints.grill <= 0.0 {
                warn!("Hold requested without a grill setpoint; rejecting");
                if let Err(e) = store.update_control(|c| {
                    c.mode = Mode::Stop;
                    c.updated = true;
                }) {
                    warn!("failed to reject Hold request: {e}");
                }
                return Ok(());
            }
            if let Err(e) = store.update_control(|c| c.updated = false) {
                warn!("failed to acknowledge mode request, retrying next poll: {e}");
                return Ok(());
            }

            let result = match mode {
                Mode::Startup | Mode::Reignite | Mode::Smoke | Mode::Hold | Mode::Shutdown => {
                    cycle::run_work_cycle(mode, devices, store, clock, emitter)
                }
                Mode::Monitor => cycle::run_monitor(devices, store, clock, emitter),
                Mode::Manual => cycle::run_manual(devices, store, clock, emitter),
                Mode::Stop | Mode::Error => unreachable!("handled above"),
            };

            if let Err(e) = result {
                error!("{mode} mode failed: {e:#}");
                let _ = devices.display.text("ERROR");
                emitter.emit(NotifyEvent::GrillError {
                    detail: format!("{e:#}"),
                });
                if let Err(e2) = store.update_control(|c| {
                    c.mode = Mode::Error;
                    c.updated = false;
                }) {
                    warn!("failed to record error state: {e2}");
                }
                return Ok(());
            }

            // Chain to the next mode when the loop ran to its own end rather
            // than being redirected.
            match mode {
                Mode::Startup | Mode::Reignite => {
                    if let Ok(control) = store.read_control() {
                        if !control.updated {
                            let next = select_next_mode(mode, &control);
                            info!("{mode} complete, entering {next}");
                            if let Err(e) = store.update_control(|c| {
                                c.mode = next;
                                c.updated = true;
                            }) {
                                warn!("failed to chain into {next}: {e}");
                            }
                        }
                    }
                }
                Mode::Shutdown => {
                    if let Ok(control) = store.read_control() {
                        if !control.updated {
                            if let Err(e) = store.update_control(|c| {
                                c.mode = Mode::Stop;
                                c.updated = true;
                            }) {
                                warn!("failed to chain into Stop: {e}");
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Control;

    #[test]
    fn startup_chains_to_hold_when_setpoint_armed() {
        let mut control = Control::default();
        control.setpoints.grill = 225.0;
        assert_eq!(select_next_mode(Mode::Startup, &control), Mode::Hold);
        control.setpoints.grill = 0.0;
        assert_eq!(select_next_mode(Mode::Startup, &control), Mode::Smoke);
    }

    #[test]
    fn reignite_resumes_the_interrupted_cook() {
        let mut control = Control::default();
        control.safety.reignite_last_state = Mode::Hold;
        control.setpoints.grill = 250.0;
        assert_eq!(select_next_mode(Mode::Reignite, &control), Mode::Hold);

        // A cleared setpoint demotes the resume to Smoke.
        control.setpoints.grill = 0.0;
        assert_eq!(select_next_mode(Mode::Reignite, &control), Mode::Smoke);

        control.safety.reignite_last_state = Mode::Smoke;
        control.setpoints.grill = 250.0;
        assert_eq!(select_next_mode(Mode::Reignite, &control), Mode::Smoke);
    }
}
