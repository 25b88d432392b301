//! The per-mode work loop.
//!
//! One cooperative thread re-enters this loop for every mode the orchestrator
//! dispatches. Startup, Reignite, Smoke, Hold and Shutdown share a single
//! body that differs only in its auger cycle timing and terminal condition;
//! Monitor and Manual have their own, simpler loops.
//!
//! Everything here is driven by the injected [`Clock`]: intervals use the
//! monotonic clock, and the only suspension point is the end-of-tick sleep,
//! which is what lets the simulator run a whole cook in milliseconds.

use crate::notify::{self, NotifyEmitter, NotifyEvent};
use crate::settings::{FanCurveMode, Settings};
use crate::state::{Control, HistorySample, Mode};
use crate::store::StateStore;
use anyhow::{Context, Result};
use ember_hal::{
    Clock, DistanceSensor, GrillPlatform, Logical, OutputState, ProbeReadings, ProbeSampler,
    SelectorSwitch, StatusData, StatusDisplay,
};
use std::time::Duration;
use thermal::pid::{CycleRatioPid, FanCurve};
use thermal::probe::Units;
use thermal::queue::TempQueue;
use thermal::safety::{startup_floor, SafetyEnvelope, SafetyVerdict};
use tracing::{debug, error, info, warn};

/// Loop period for the fire-driving modes.
const WORK_TICK: Duration = Duration::from_millis(50);
/// Loop period for Manual mode.
const MANUAL_TICK: Duration = Duration::from_millis(200);
/// How often the control snapshot is reloaded in work modes.
const CONTROL_RELOAD: Duration = Duration::from_millis(100);
/// Control snapshot reload period in Monitor and Manual.
const CONTROL_RELOAD_SLOW: Duration = Duration::from_millis(500);
/// Display refresh period in work modes.
const DISPLAY_REFRESH: Duration = Duration::from_millis(500);
/// Display refresh period in Monitor and Manual.
const DISPLAY_REFRESH_SLOW: Duration = Duration::from_secs(1);
/// History sample period.
const HISTORY_PERIOD: Duration = Duration::from_secs(3);
/// Hold-mode fan duty reevaluation period.
const FAN_UPDATE: Duration = Duration::from_secs(6);
/// Unsolicited hopper level measurement period.
const HOPPER_CHECK: Duration = Duration::from_secs(300);
/// Low-pellet warning reevaluation period.
const PELLET_CHECK: Duration = Duration::from_secs(1200);
/// Startup and Reignite give the fire this long before handing over.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(240);
/// Auger off time in Smoke and Startup is this base plus 10 s per P-mode step.
const P_MODE_BASE_OFF_TIME: f64 = 45.0;

/// The device set the loop drives. Borrowed so tests keep their handles.
pub struct Devices<'a> {
    pub platform: &'a mut dyn GrillPlatform,
    pub probes: &'a mut dyn ProbeSampler,
    pub distance: &'a mut dyn DistanceSensor,
    pub display: &'a mut dyn StatusDisplay,
}

/// Hold-mode stepwise fan table over the current cycle ratio.
fn stepwise_fan_duty(cycle_ratio: f64) -> u8 {
    if cycle_ratio > 0.35 {
        95
    } else if cycle_ratio > 0.3 {
        85
    } else if cycle_ratio > 0.2 {
        70
    } else {
        55
    }
}

/// Assembles the status bundle shown on the display.
fn status_data(
    control: &Control,
    outputs: OutputState,
    hopper_level: f64,
    units: Units,
) -> StatusData {
    StatusData {
        outputs,
        mode: control.mode.as_str().to_string(),
        notify_grill: control.notify_req.grill,
        notify_probe1: control.notify_req.probe1,
        notify_probe2: control.notify_req.probe2,
        notify_timer: control.notify_req.timer,
        timer_start: control.timer.start,
        timer_end: control.timer.end,
        timer_paused: control.timer.paused,
        smoke_plus: control.s_plus,
        hopper_level,
        units: units.as_str(),
    }
}

/// Applies a control mutation through the store, falling back to the
/// in-memory snapshot when the store is unavailable; the loop never stops
/// over a disk error.
fn sync_control(store: &StateStore, control: &mut Control, mutate: impl Fn(&mut Control)) {
    match store.update_control(&mutate) {
        Ok(merged) => *control = merged,
        Err(e) => {
            warn!("control store update failed, continuing in memory: {e}");
            mutate(control);
        }
    }
}

/// What Smoke-Plus wants the fan to do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SmokePlusAction {
    /// Outside the smoke band: run the fan steadily at the configured duty.
    ForceOn,
    /// Inside the band: toggle once the half-cycle has elapsed.
    CycleFan,
}

fn smoke_plus_action(avg_grill: f64, min_temp: f64, max_temp: f64) -> SmokePlusAction {
    if avg_grill > max_temp || avg_grill < min_temp {
        SmokePlusAction::ForceOn
    } else {
        SmokePlusAction::CycleFan
    }
}

/// Per-probe rolling state for one mode entry.
struct ProbeAverages {
    grill: TempQueue,
    probe1: TempQueue,
    probe2: TempQueue,
    degraded_logged: [bool; 3],
}

impl ProbeAverages {
    fn new(units: Units, grill_window: usize) -> Self {
        Self {
            grill: TempQueue::new(grill_window, units),
            probe1: TempQueue::new(TempQueue::PROBE_WINDOW, units),
            probe2: TempQueue::new(TempQueue::PROBE_WINDOW, units),
            degraded_logged: [false; 3],
        }
    }

    fn enqueue(&mut self, sample: &ember_hal::ProbeSample) {
        self.grill.enqueue(sample.grill_temp);
        self.probe1.enqueue(sample.probe1_temp);
        self.probe2.enqueue(sample.probe2_temp);
        for (i, (queue, name)) in [
            (&self.grill, "grill"),
            (&self.probe1, "probe 1"),
            (&self.probe2, "probe 2"),
        ]
        .into_iter()
        .enumerate()
        {
            if queue.is_degraded() && !self.degraded_logged[i] {
                warn!("{name} probe reading degraded, holding last valid average");
                self.degraded_logged[i] = true;
            } else if !queue.is_degraded() {
                self.degraded_logged[i] = false;
            }
        }
    }

    fn readings(&self, control: &Control, sample: &ember_hal::ProbeSample) -> ProbeReadings {
        ProbeReadings {
            grill_temp: self.grill.average(),
            grill_setpoint: control.setpoints.grill,
            probe1_temp: self.probe1.average(),
            probe1_setpoint: control.setpoints.probe1,
            probe2_temp: self.probe2.average(),
            probe2_setpoint: control.setpoints.probe2,
            grill_resistance: sample.grill_resistance,
            probe1_resistance: sample.probe1_resistance,
            probe2_resistance: sample.probe2_resistance,
        }
    }
}

fn history_sample(readings: &ProbeReadings, tuning_mode: bool, wall_epoch: f64) -> HistorySample {
    HistorySample {
        ts: wall_epoch,
        grill_temp: readings.grill_temp,
        grill_setpoint: readings.grill_setpoint,
        probe1_temp: readings.probe1_temp,
        probe1_setpoint: readings.probe1_setpoint,
        probe2_temp: readings.probe2_temp,
        probe2_setpoint: readings.probe2_setpoint,
        grill_resistance: tuning_mode.then_some(readings.grill_resistance),
        probe1_resistance: tuning_mode.then_some(readings.probe1_resistance),
        probe2_resistance: tuning_mode.then_some(readings.probe2_resistance),
    }
}

/// Work loop for Startup, Reignite, Smoke, Hold and Shutdown.
///
/// Returns when the mode ends for any reason: a collaborator raised
/// `updated`, the safety envelope forced a transition, the selector switch
/// was flipped, or the mode's own timeout elapsed. Entry-time hardware
/// failures propagate; the orchestrator treats them as fatal.
pub fn run_work_cycle(
    mode: Mode,
    devices: &mut Devices,
    store: &StateStore,
    clock: &dyn Clock,
    emitter: &NotifyEmitter,
) -> Result<()> {
    debug_assert!(matches!(
        mode,
        Mode::Startup | Mode::Reignite | Mode::Smoke | Mode::Hold | Mode::Shutdown
    ));
    info!("{mode} mode started");

    let mut settings = store.read_settings().unwrap_or_else(|e| {
        warn!("settings unreadable, using defaults: {e}");
        Settings::default()
    });
    let mut control = store.read_control().context("control document unreadable")?;
    let mut pelletdb = store.read_pelletdb().unwrap_or_default();
    let units = settings.globals.units;
    let debug_mode = settings.globals.debug_mode;

    let mut last_switch = devices.platform.input_status()?;

    // Starting actuator configuration.
    devices.platform.fan_on()?;
    devices.platform.igniter_off()?;
    devices.platform.auger_off()?;
    devices.platform.power_on()?;
    devices.platform.fan_duty_cycle(50)?;
    if matches!(mode, Mode::Startup | Mode::Reignite) {
        devices.platform.igniter_on()?;
        if debug_mode {
            debug!("igniter on");
        }
    }
    if matches!(mode, Mode::Smoke | Mode::Hold | Mode::Startup | Mode::Reignite) {
        devices.platform.auger_on()?;
        devices.platform.fan_duty_cycle(55)?;
        if debug_mode {
            debug!("auger on, fan duty 55");
        }
    }

    // Auger cycle timing.
    let cycle_data = settings.cycle_data.clone();
    let (mut on_time, mut off_time);
    let mut cycle_ratio;
    match mode {
        Mode::Startup | Mode::Reignite | Mode::Smoke => {
            on_time = cycle_data.smoke_cycle_time;
            off_time = P_MODE_BASE_OFF_TIME + f64::from(cycle_data.p_mode) * 10.0;
            cycle_ratio = on_time / (on_time + off_time);
        }
        Mode::Shutdown => {
            on_time = 0.0;
            off_time = 100.0;
            cycle_ratio = 0.0;
        }
        _ => {
            // Hold: optionally force a short first cycle so the first PID
            // output takes effect after one second instead of one period.
            if cycle_data.fast_first_cycle {
                on_time = 0.1;
                off_time = 0.9;
                cycle_ratio = 0.1;
            } else {
                on_time = cycle_data.hold_cycle_time * cycle_data.u_min;
                off_time = cycle_data.hold_cycle_time * (1.0 - cycle_data.u_min);
                cycle_ratio = cycle_data.u_min;
            }
        }
    }
    let mut cycle_time = on_time + off_time;

    let mut pid = (mode == Mode::Hold).then(|| {
        let mut pid = CycleRatioPid::new(
            cycle_data.pb,
            cycle_data.ti,
            cycle_data.td,
            cycle_data.center,
            cycle_data.u_min,
            cycle_data.u_max,
            cycle_data.hold_cycle_time,
            FanCurve::default(),
        );
        pid.set_target(control.setpoints.grill, clock.monotonic());
        pid
    });
    if debug_mode {
        debug!(on_time, off_time, cycle_time, cycle_ratio, "cycle configured");
    }

    let mut averages = ProbeAverages::new(units, TempQueue::GRILL_WINDOW);

    notify::check_pellets(&settings, &pelletdb, emitter);

    let (grill_profile, p1_profile, p2_profile) = settings.probes.selected();
    devices
        .probes
        .set_profiles(grill_profile, p1_profile, p2_profile);

    let mut sample = devices.probes.read_all()?;
    averages.enqueue(&sample);

    let mut active = true;

    // Safety prelude: Startup records the envelope floor; Smoke and Hold
    // verify the fire survived Startup before feeding more pellets.
    match mode {
        Mode::Startup | Mode::Reignite => {
            let avg = averages.grill.average();
            let floor = startup_floor(
                avg,
                settings.safety.startup_scale,
                settings.safety.min_startup_temp,
                settings.safety.max_startup_temp,
            );
            sync_control(store, &mut control, |c| {
                c.safety.startup_temp = floor;
                c.safety.after_start_temp = avg;
            });
        }
        Mode::Smoke | Mode::Hold => {
            if control.safety.after_start_temp < control.safety.startup_temp {
                let startup_temp = control.safety.startup_temp;
                if control.safety.reignite_retries == 0 {
                    error!(
                        "grill fell below the startup temperature of {startup_temp}{}; \
                         stopping to prevent firepot overload",
                        units.as_str()
                    );
                    let _ = devices.display.text("ERROR");
                    sync_control(store, &mut control, |c| {
                        c.mode = Mode::Error;
                        c.updated = true;
                    });
                    emitter.emit(NotifyEvent::StartupTempFailure { startup_temp });
                } else {
                    error!(
                        "grill fell below the startup temperature of {startup_temp}{}; \
                         attempting re-ignite",
                        units.as_str()
                    );
                    let _ = devices.display.text("Re-Ignite");
                    sync_control(store, &mut control, |c| {
                        c.safety.reignite_retries = c.safety.reignite_retries.saturating_sub(1);
                        c.safety.reignite_last_state = mode;
                        c.mode = Mode::Reignite;
                        c.updated = true;
                    });
                }
                active = false;
            }
        }
        _ => {}
    }

    let start_time = clock.monotonic();
    let mut history_toggle = start_time;
    let mut auger_toggle = start_time;
    let mut display_toggle = start_time;
    let mut sp_cycle_toggle = start_time;
    let mut hopper_toggle = start_time;
    let mut control_check = start_time;
    let mut pellets_check = start_time;
    let mut fan_update = start_time;
    let mut target_temp_achieved = false;

    while active {
        let now = clock.monotonic();

        devices.display.poll_events();

        if now.duration_since(control_check) > CONTROL_RELOAD {
            match store.read_control() {
                Ok(c) => control = c,
                Err(e) => warn!("control reload failed, keeping last snapshot: {e}"),
            }
            control_check = now;
        }

        if now.duration_since(pellets_check) > PELLET_CHECK {
            notify::check_pellets(&settings, &pelletdb, emitter);
            pellets_check = now;
        }

        // A collaborator requested a mode change; the orchestrator takes over.
        if control.updated {
            break;
        }

        // Hopper level on demand or every five minutes.
        if control.hopper_check || now.duration_since(hopper_toggle) > HOPPER_CHECK {
            match devices.distance.hopper_level() {
                Ok(level) => {
                    match store.update_pelletdb(|db| db.current.hopper_level = level) {
                        Ok(db) => pelletdb = db,
                        Err(e) => warn!("pellet store update failed: {e}"),
                    }
                    if debug_mode {
                        debug!("hopper level checked at {level:.0}%");
                    }
                }
                Err(e) => warn!("hopper level read failed: {e}"),
            }
            hopper_toggle = now;
            if control.hopper_check {
                sync_control(store, &mut control, |c| c.hopper_check = false);
            }
        }

        // Selector switch moved: hand the grill back and stop.
        match devices.platform.input_status() {
            Ok(switch) => {
                if switch != last_switch {
                    last_switch = switch;
                    if switch == SelectorSwitch::Oem {
                        info!("selector switch set to OEM, stopping");
                        sync_control(store, &mut control, |c| {
                            c.mode = Mode::Stop;
                            c.updated = true;
                        });
                        break;
                    }
                }
            }
            Err(e) => warn!("selector switch read failed: {e}"),
        }

        let outputs = match devices.platform.output_status() {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!("output status read failed, skipping tick: {e}");
                clock.sleep(WORK_TICK);
                continue;
            }
        };

        // Hold: refresh the combustion fan duty every few seconds.
        if mode == Mode::Hold && now.duration_since(fan_update) > FAN_UPDATE {
            let duty = match cycle_data.fan_curve {
                FanCurveMode::Stepwise => stepwise_fan_duty(cycle_ratio),
                FanCurveMode::Pid => pid
                    .as_mut()
                    .map(|p| p.compute_fan_speed().round() as u8)
                    .unwrap_or(55),
            };
            if let Err(e) = devices.platform.fan_duty_cycle(duty) {
                warn!("fan duty update failed: {e}");
            } else if debug_mode {
                debug!("new fan duty cycle {duty}%");
            }
            fan_update = now;
        }

        // Auger cycling. The off-to-on edge is where Hold recomputes the
        // cycle ratio, so a full period always runs with one ratio.
        if outputs.auger == Logical::Off
            && now.duration_since(auger_toggle).as_secs_f64() > cycle_time * (1.0 - cycle_ratio)
        {
            if let Err(e) = devices.platform.auger_on() {
                warn!("auger on failed: {e}");
            }
            auger_toggle = now;
            if let Some(pid) = pid.as_mut() {
                cycle_ratio = pid.update(averages.grill.average(), now);
                on_time = cycle_data.hold_cycle_time * cycle_ratio;
                off_time = cycle_data.hold_cycle_time * (1.0 - cycle_ratio);
                cycle_time = on_time + off_time;
                if debug_mode {
                    let (p, i, d) = pid.terms();
                    debug!(on_time, off_time, cycle_ratio, p, i, d, "hold cycle recomputed");
                }
            }
            if debug_mode {
                debug!("cycle event: auger on");
            }
        }
        if outputs.auger == Logical::On
            && now.duration_since(auger_toggle).as_secs_f64() > cycle_time * cycle_ratio
        {
            if let Err(e) = devices.platform.auger_off() {
                warn!("auger off failed: {e}");
            }
            auger_toggle = now;
            if debug_mode {
                debug!("cycle event: auger off");
            }
        }

        // Collaborator edited the probe profiles: reload and push to the ADC.
        if control.probe_profile_update {
            match store.read_settings() {
                Ok(s) => settings = s,
                Err(e) => warn!("settings reload failed: {e}"),
            }
            sync_control(store, &mut control, |c| c.probe_profile_update = false);
            let (grill_profile, p1_profile, p2_profile) = settings.probes.selected();
            devices
                .probes
                .set_profiles(grill_profile, p1_profile, p2_profile);
        }

        match devices.probes.read_all() {
            Ok(s) => {
                sample = s;
                averages.enqueue(&sample);
            }
            Err(e) => warn!("probe read failed, reusing last averages: {e}"),
        }
        let readings = averages.readings(&control, &sample);

        // Threshold notifications, applied against a fresh document so a
        // concurrent collaborator edit is not lost.
        let fired = notify::pending(&readings, &control, clock.wall_epoch());
        if !fired.is_empty() {
            sync_control(store, &mut control, |c| {
                notify::acknowledge(c, &fired, emitter)
            });
        }

        if now.duration_since(display_toggle) > DISPLAY_REFRESH {
            let status = status_data(&control, outputs, pelletdb.current.hopper_level, units);
            if let Err(e) = devices.display.status(&readings, &status) {
                warn!("display update failed: {e}");
            }
            display_toggle = now;
        }

        // Safety evaluation.
        match mode {
            Mode::Startup | Mode::Reignite => {
                control.safety.after_start_temp = averages.grill.average();
            }
            Mode::Smoke | Mode::Hold => {
                let envelope = SafetyEnvelope {
                    startup_temp: control.safety.startup_temp,
                    max_temp: settings.safety.max_temp,
                };
                match envelope.check_work(averages.grill.average(), control.safety.reignite_retries)
                {
                    SafetyVerdict::Ok => {}
                    SafetyVerdict::Reignite { retries_left } => {
                        error!(
                            "grill fell below the startup temperature of {}{}; \
                             attempting re-ignite ({retries_left} retries left)",
                            envelope.startup_temp,
                            units.as_str()
                        );
                        let _ = devices.display.text("Re-Ignite");
                        sync_control(store, &mut control, |c| {
                            c.safety.reignite_retries = retries_left;
                            c.safety.reignite_last_state = mode;
                            c.mode = Mode::Reignite;
                            c.updated = true;
                        });
                        break;
                    }
                    SafetyVerdict::StartupFailure => {
                        let startup_temp = envelope.startup_temp;
                        error!(
                            "grill fell below the startup temperature of {startup_temp}{}; \
                             stopping to prevent firepot overload",
                            units.as_str()
                        );
                        let _ = devices.display.text("ERROR");
                        sync_control(store, &mut control, |c| {
                            c.mode = Mode::Error;
                            c.updated = true;
                        });
                        emitter.emit(NotifyEvent::StartupTempFailure { startup_temp });
                        break;
                    }
                    SafetyVerdict::OverTemp => {
                        let max_temp = settings.safety.max_temp;
                        error!(
                            "grill exceeded the maximum temperature limit of {max_temp}{}; \
                             stopping",
                            units.as_str()
                        );
                        let _ = devices.display.text("ERROR");
                        sync_control(store, &mut control, |c| {
                            c.mode = Mode::Error;
                            c.updated = true;
                        });
                        emitter.emit(NotifyEvent::MaxTempExceeded { max_temp });
                        break;
                    }
                }
            }
            _ => {}
        }

        // Smoke-Plus only engages in Hold once the setpoint has been reached.
        if mode == Mode::Hold
            && !target_temp_achieved
            && averages.grill.average() >= control.setpoints.grill
        {
            target_temp_achieved = true;
        }

        if (mode == Mode::Smoke || (mode == Mode::Hold && target_temp_achieved)) && control.s_plus
        {
            let sp = &settings.smoke_plus;
            match smoke_plus_action(averages.grill.average(), sp.min_temp, sp.max_temp) {
                SmokePlusAction::ForceOn => {
                    if let Err(e) = devices.platform.fan_on() {
                        warn!("smoke plus fan force-on failed: {e}");
                    } else if let Err(e) = devices.platform.fan_duty_cycle(sp.duty_cycle) {
                        warn!("smoke plus fan duty failed: {e}");
                    }
                }
                SmokePlusAction::CycleFan => {
                    if now.duration_since(sp_cycle_toggle).as_secs_f64() > sp.cycle * 0.5 {
                        if let Err(e) = devices.platform.fan_toggle() {
                            warn!("smoke plus fan toggle failed: {e}");
                        } else if debug_mode {
                            debug!("smoke plus: fan toggled");
                        }
                        sp_cycle_toggle = now;
                    }
                }
            }
        } else if outputs.fan == Logical::Off && !control.s_plus {
            // Smoke-Plus was just disarmed mid-toggle; never run the fire
            // without the combustion fan.
            if let Err(e) = devices.platform.fan_on() {
                warn!("fan restart failed: {e}");
            }
        }

        if now.duration_since(history_toggle) > HISTORY_PERIOD {
            let sample = history_sample(&readings, control.tuning_mode, clock.wall_epoch());
            if let Err(e) = store.append_history(&sample) {
                warn!("history append failed: {e}");
            }
            history_toggle = now;
        }

        // Terminal conditions.
        if matches!(mode, Mode::Startup | Mode::Reignite)
            && now.duration_since(start_time) > STARTUP_TIMEOUT
        {
            break;
        }
        if mode == Mode::Shutdown
            && now.duration_since(start_time).as_secs_f64() > settings.globals.shutdown_timer
        {
            break;
        }

        clock.sleep(WORK_TICK);
    }

    // Exit actions.
    if let Err(e) = devices.platform.auger_off() {
        warn!("auger off at exit failed: {e}");
    }
    if let Err(e) = devices.platform.igniter_off() {
        warn!("igniter off at exit failed: {e}");
    }
    if mode == Mode::Shutdown {
        let _ = devices.platform.fan_duty_cycle(0);
        if let Err(e) = devices.platform.fan_off() {
            warn!("fan off at exit failed: {e}");
        }
        if let Err(e) = devices.platform.power_off() {
            warn!("power off at exit failed: {e}");
        }
    }
    if matches!(mode, Mode::Startup | Mode::Reignite) {
        let after_start = averages.grill.average();
        sync_control(store, &mut control, |c| {
            c.safety.after_start_temp = after_start;
        });
    }
    info!("{mode} mode ended");
    Ok(())
}

/// Monitor loop: the OEM controller owns the fire; we watch, record and
/// enforce only the maximum-temperature ceiling.
pub fn run_monitor(
    devices: &mut Devices,
    store: &StateStore,
    clock: &dyn Clock,
    emitter: &NotifyEmitter,
) -> Result<()> {
    info!("Monitor mode started");

    let mut settings = store.read_settings().unwrap_or_default();
    let mut control = store.read_control().context("control document unreadable")?;
    let mut pelletdb = store.read_pelletdb().unwrap_or_default();
    let units = settings.globals.units;
    let debug_mode = settings.globals.debug_mode;

    let mut last_switch = devices.platform.input_status()?;

    devices.platform.auger_off()?;
    devices.platform.igniter_off()?;
    devices.platform.fan_off()?;
    devices.platform.power_off()?;

    let mut averages = ProbeAverages::new(units, TempQueue::PROBE_WINDOW);

    notify::check_pellets(&settings, &pelletdb, emitter);

    let (grill_profile, p1_profile, p2_profile) = settings.probes.selected();
    devices
        .probes
        .set_profiles(grill_profile, p1_profile, p2_profile);
    let mut sample = devices.probes.read_all()?;
    averages.enqueue(&sample);

    let start_time = clock.monotonic();
    let mut history_toggle = start_time;
    let mut display_toggle = start_time;
    let mut hopper_toggle = start_time;
    let mut control_check = start_time;
    let mut pellets_check = start_time;

    loop {
        let now = clock.monotonic();

        devices.display.poll_events();

        if now.duration_since(control_check) > CONTROL_RELOAD_SLOW {
            match store.read_control() {
                Ok(c) => control = c,
                Err(e) => warn!("control reload failed, keeping last snapshot: {e}"),
            }
            control_check = now;
        }

        if now.duration_since(pellets_check) > PELLET_CHECK {
            notify::check_pellets(&settings, &pelletdb, emitter);
            pellets_check = now;
        }

        if control.updated {
            break;
        }

        match devices.platform.input_status() {
            Ok(switch) => {
                if switch != last_switch {
                    last_switch = switch;
                    if switch == SelectorSwitch::Oem {
                        info!("selector switch set to OEM, stopping");
                        sync_control(store, &mut control, |c| {
                            c.mode = Mode::Stop;
                            c.updated = true;
                        });
                        break;
                    }
                }
            }
            Err(e) => warn!("selector switch read failed: {e}"),
        }

        if control.hopper_check || now.duration_since(hopper_toggle) > HOPPER_CHECK {
            match devices.distance.hopper_level() {
                Ok(level) => {
                    match store.update_pelletdb(|db| db.current.hopper_level = level) {
                        Ok(db) => pelletdb = db,
                        Err(e) => warn!("pellet store update failed: {e}"),
                    }
                    if debug_mode {
                        debug!("hopper level checked at {level:.0}%");
                    }
                }
                Err(e) => warn!("hopper level read failed: {e}"),
            }
            hopper_toggle = now;
            if control.hopper_check {
                sync_control(store, &mut control, |c| c.hopper_check = false);
            }
        }

        if control.probe_profile_update {
            match store.read_settings() {
                Ok(s) => settings = s,
                Err(e) => warn!("settings reload failed: {e}"),
            }
            sync_control(store, &mut control, |c| c.probe_profile_update = false);
            let (grill_profile, p1_profile, p2_profile) = settings.probes.selected();
            devices
                .probes
                .set_profiles(grill_profile, p1_profile, p2_profile);
        }

        match devices.probes.read_all() {
            Ok(s) => {
                sample = s;
                averages.enqueue(&sample);
            }
            Err(e) => warn!("probe read failed, reusing last averages: {e}"),
        }
        let readings = averages.readings(&control, &sample);

        let fired = notify::pending(&readings, &control, clock.wall_epoch());
        if !fired.is_empty() {
            sync_control(store, &mut control, |c| {
                notify::acknowledge(c, &fired, emitter)
            });
        }

        if now.duration_since(display_toggle) > DISPLAY_REFRESH_SLOW {
            let outputs = match devices.platform.output_status() {
                Ok(outputs) => outputs,
                Err(e) => {
                    warn!("output status read failed: {e}");
                    clock.sleep(WORK_TICK);
                    continue;
                }
            };
            let status = status_data(&control, outputs, pelletdb.current.hopper_level, units);
            if let Err(e) = devices.display.status(&readings, &status) {
                warn!("display update failed: {e}");
            }
            display_toggle = now;
        }

        if now.duration_since(history_toggle) > HISTORY_PERIOD {
            let sample = history_sample(&readings, control.tuning_mode, clock.wall_epoch());
            if let Err(e) = store.append_history(&sample) {
                warn!("history append failed: {e}");
            }
            history_toggle = now;
        }

        let envelope = SafetyEnvelope {
            startup_temp: control.safety.startup_temp,
            max_temp: settings.safety.max_temp,
        };
        if envelope.check_monitor(averages.grill.average()) == SafetyVerdict::OverTemp {
            let max_temp = settings.safety.max_temp;
            error!(
                "grill exceeded the maximum temperature limit of {max_temp}{} while monitoring",
                units.as_str()
            );
            let _ = devices.display.text("ERROR");
            sync_control(store, &mut control, |c| {
                c.mode = Mode::Error;
                c.updated = true;
            });
            emitter.emit(NotifyEvent::MaxTempExceeded { max_temp });
            break;
        }

        clock.sleep(WORK_TICK);
    }

    info!("Monitor mode ended");
    Ok(())
}

/// Manual loop: actuators mirror `control.manual`, nothing else drives them.
pub fn run_manual(
    devices: &mut Devices,
    store: &StateStore,
    clock: &dyn Clock,
    emitter: &NotifyEmitter,
) -> Result<()> {
    info!("Manual mode started");

    let mut settings = store.read_settings().unwrap_or_default();
    let mut control = store.read_control().context("control document unreadable")?;
    let pelletdb = store.read_pelletdb().unwrap_or_default();
    let units = settings.globals.units;

    let mut last_switch = devices.platform.input_status()?;

    devices.platform.auger_off()?;
    devices.platform.igniter_off()?;
    devices.platform.fan_off()?;
    devices.platform.power_off()?;

    let mut averages = ProbeAverages::new(units, TempQueue::PROBE_WINDOW);

    let (grill_profile, p1_profile, p2_profile) = settings.probes.selected();
    devices
        .probes
        .set_profiles(grill_profile, p1_profile, p2_profile);
    let mut sample = devices.probes.read_all()?;
    averages.enqueue(&sample);

    let start_time = clock.monotonic();
    let mut history_toggle = start_time;
    let mut display_toggle = start_time;
    let mut control_check = start_time;

    loop {
        let now = clock.monotonic();

        devices.display.poll_events();

        if now.duration_since(control_check) > CONTROL_RELOAD_SLOW {
            match store.read_control() {
                Ok(c) => control = c,
                Err(e) => warn!("control reload failed, keeping last snapshot: {e}"),
            }
            control_check = now;
        }

        if control.updated {
            break;
        }

        match devices.platform.input_status() {
            Ok(switch) => {
                if switch != last_switch {
                    last_switch = switch;
                    if switch == SelectorSwitch::Oem {
                        info!("selector switch set to OEM, stopping");
                        sync_control(store, &mut control, |c| {
                            c.mode = Mode::Stop;
                            c.updated = true;
                        });
                        break;
                    }
                }
            }
            Err(e) => warn!("selector switch read failed: {e}"),
        }

        let outputs = match devices.platform.output_status() {
            Ok(outputs) => outputs,
            Err(e) => {
                warn!("output status read failed, skipping tick: {e}");
                clock.sleep(MANUAL_TICK);
                continue;
            }
        };

        if control.manual.change {
            let wanted = control.manual;
            apply_manual(devices.platform, outputs, wanted);
            sync_control(store, &mut control, |c| c.manual.change = false);
        }

        if control.probe_profile_update {
            match store.read_settings() {
                Ok(s) => settings = s,
                Err(e) => warn!("settings reload failed: {e}"),
            }
            sync_control(store, &mut control, |c| c.probe_profile_update = false);
            let (grill_profile, p1_profile, p2_profile) = settings.probes.selected();
            devices
                .probes
                .set_profiles(grill_profile, p1_profile, p2_profile);
        }

        match devices.probes.read_all() {
            Ok(s) => {
                sample = s;
                averages.enqueue(&sample);
            }
            Err(e) => warn!("probe read failed, reusing last averages: {e}"),
        }
        let readings = averages.readings(&control, &sample);

        if now.duration_since(display_toggle) > DISPLAY_REFRESH_SLOW {
            let status = status_data(&control, outputs, pelletdb.current.hopper_level, units);
            if let Err(e) = devices.display.status(&readings, &status) {
                warn!("display update failed: {e}");
            }
            display_toggle = now;
        }

        let fired = notify::pending(&readings, &control, clock.wall_epoch());
        if !fired.is_empty() {
            sync_control(store, &mut control, |c| {
                notify::acknowledge(c, &fired, emitter)
            });
        }

        if now.duration_since(history_toggle) > HISTORY_PERIOD {
            let sample = history_sample(&readings, control.tuning_mode, clock.wall_epoch());
            if let Err(e) = store.append_history(&sample) {
                warn!("history append failed: {e}");
            }
            history_toggle = now;
        }

        clock.sleep(MANUAL_TICK);
    }

    devices.platform.auger_off()?;
    devices.platform.igniter_off()?;
    devices.platform.fan_off()?;
    devices.platform.power_off()?;

    info!("Manual mode ended");
    Ok(())
}

/// Drives the outputs toward the manually requested states.
fn apply_manual(
    platform: &mut dyn GrillPlatform,
    outputs: OutputState,
    wanted: crate::state::ManualState,
) {
    let result = (|| -> Result<(), ember_hal::HalError> {
        if wanted.fan && outputs.fan == Logical::Off {
            platform.fan_on()?;
        } else if !wanted.fan && outputs.fan == Logical::On {
            platform.fan_off()?;
        }
        if wanted.auger && outputs.auger == Logical::Off {
            platform.auger_on()?;
        } else if !wanted.auger && outputs.auger == Logical::On {
            platform.auger_off()?;
        }
        if wanted.igniter && outputs.igniter == Logical::Off {
            platform.igniter_on()?;
        } else if !wanted.igniter && outputs.igniter == Logical::On {
            platform.igniter_off()?;
        }
        if wanted.power && outputs.power == Logical::Off {
            platform.power_on()?;
        } else if !wanted.power && outputs.power == Logical::On {
            platform.power_off()?;
        }
        if let Some(duty) = wanted.pwm {
            platform.fan_duty_cycle(duty)?;
        }
        Ok(())
    })();
    if let Err(e) = result {
        warn!("manual actuator change failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stepwise_fan_table_matches_contract() {
        assert_eq!(stepwise_fan_duty(0.4), 95);
        assert_eq!(stepwise_fan_duty(0.32), 85);
        assert_eq!(stepwise_fan_duty(0.25), 70);
        assert_eq!(stepwise_fan_duty(0.15), 55);
        // Boundary values fall to the lower band.
        assert_eq!(stepwise_fan_duty(0.35), 85);
        assert_eq!(stepwise_fan_duty(0.3), 70);
        assert_eq!(stepwise_fan_duty(0.2), 55);
    }

    #[test]
    fn smoke_plus_forces_fan_outside_the_band() {
        assert_eq!(smoke_plus_action(225.0, 160.0, 220.0), SmokePlusAction::ForceOn);
        assert_eq!(smoke_plus_action(150.0, 160.0, 220.0), SmokePlusAction::ForceOn);
        assert_eq!(smoke_plus_action(180.0, 160.0, 220.0), SmokePlusAction::CycleFan);
    }
}
