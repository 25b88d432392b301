//! End-to-end tests: the real mode loops driven against the grill simulator
//! with a simulated clock, so a whole cook runs in milliseconds.

use ember_hal::relay::{InPins, OutPins, RelayPlatform, TriggerLevel};
use ember_hal::{Clock, Logical};
use ember_host::cycle::{self, Devices};
use ember_host::notify::{self, NotifyEmitter, NotifyEvent};
use ember_host::orchestrator;
use ember_host::settings::Settings;
use ember_host::state::{Control, Mode};
use ember_host::store::StateStore;
use sim::{GrillSim, SharedGrill, SimClock, SimDisplay, SimGpio, SimHopper, SimParams, SimProbes};
use std::sync::Arc;

const OUT: OutPins = OutPins {
    power: 18,
    auger: 4,
    fan: 15,
    igniter: 14,
    pwm: 13,
};
const IN: InPins = InPins { selector: 17 };

struct Harness {
    store: Arc<StateStore>,
    clock: Arc<SimClock>,
    grill: SharedGrill,
    platform: RelayPlatform<SimGpio>,
    probes: SimProbes,
    hopper: SimHopper,
    display: SimDisplay,
    emitter: NotifyEmitter,
    events: crossbeam_channel::Receiver<NotifyEvent>,
}

impl Harness {
    fn new(tag: &str, params: SimParams, settings: Settings, control: Control) -> Self {
        let dir = std::env::temp_dir().join(format!("ember-it-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let store = Arc::new(StateStore::new(dir).unwrap());
        store.write_settings(&settings).unwrap();
        store.write_control(&control).unwrap();

        let clock = Arc::new(SimClock::new());
        let grill = GrillSim::new(params);
        let gpio = SimGpio::new(grill.clone(), OUT, IN, TriggerLevel::ActiveLow);
        let platform = RelayPlatform::new(gpio, OUT, IN, TriggerLevel::ActiveLow).unwrap();
        let probe_clock: Arc<dyn Clock> = clock.clone();
        let probes = SimProbes::new(grill.clone(), probe_clock, settings.globals.units);
        let hopper = SimHopper::new(grill.clone());
        let display = SimDisplay::new();
        let (emitter, events) = notify::channel();

        Self {
            store,
            clock,
            grill,
            platform,
            probes,
            hopper,
            display,
            emitter,
            events,
        }
    }

    fn run_cycle(&mut self, mode: Mode) {
        let mut devices = Devices {
            platform: &mut self.platform,
            probes: &mut self.probes,
            distance: &mut self.hopper,
            display: &mut self.display,
        };
        cycle::run_work_cycle(mode, &mut devices, &self.store, self.clock.as_ref(), &self.emitter)
            .unwrap();
    }

    fn run_monitor(&mut self) {
        let mut devices = Devices {
            platform: &mut self.platform,
            probes: &mut self.probes,
            distance: &mut self.hopper,
            display: &mut self.display,
        };
        cycle::run_monitor(&mut devices, &self.store, self.clock.as_ref(), &self.emitter).unwrap();
    }

    fn run_manual(&mut self) {
        let mut devices = Devices {
            platform: &mut self.platform,
            probes: &mut self.probes,
            distance: &mut self.hopper,
            display: &mut self.display,
        };
        cycle::run_manual(&mut devices, &self.store, self.clock.as_ref(), &self.emitter).unwrap();
    }

    fn orchestrator_step(&mut self) {
        let mut devices = Devices {
            platform: &mut self.platform,
            probes: &mut self.probes,
            distance: &mut self.hopper,
            display: &mut self.display,
        };
        orchestrator::step(&mut devices, &self.store, self.clock.as_ref(), &self.emitter).unwrap();
    }

    fn control(&self) -> Control {
        self.store.read_control().unwrap()
    }

    fn outputs(&mut self) -> ember_hal::OutputState {
        use ember_hal::GrillPlatform;
        self.platform.output_status().unwrap()
    }

    fn events(&self) -> Vec<NotifyEvent> {
        self.events.try_iter().collect()
    }

    fn fired(&self, events: &[NotifyEvent], wire_name: &str) -> bool {
        events.iter().any(|e| e.wire_name() == wire_name)
    }
}

fn ambient(params: SimParams, ambient: f64) -> SimParams {
    let mut params = params;
    params.ambient = ambient;
    params
}

#[test]
fn startup_records_floor_and_hands_over_after_timeout() {
    let mut control = Control::default();
    control.mode = Mode::Startup;
    let mut harness = Harness::new(
        "startup",
        ambient(SimParams::default(), 75.0),
        Settings::default(),
        control,
    );
    // A near-empty hopper, as last measured by a previous run.
    harness
        .store
        .update_pelletdb(|db| db.current.hopper_level = 20.0)
        .unwrap();

    harness.run_cycle(Mode::Startup);

    // Cold grill at 75F: 0.9 * 75 clamps up to the 75F minimum floor.
    let control = harness.control();
    assert_eq!(control.safety.startup_temp, 75.0);
    // The fire caught: the recorded after-start temperature shows real heat.
    assert!(
        control.safety.after_start_temp > 100.0,
        "after_start_temp was {}",
        control.safety.after_start_temp
    );
    assert!(harness.clock.elapsed() >= 240.0);
    assert!(!control.updated, "startup ran to its own timeout");

    // Igniter and auger are parked at exit, the fan keeps running.
    let outputs = harness.outputs();
    assert_eq!(outputs.igniter, Logical::Off);
    assert_eq!(outputs.auger, Logical::Off);
    assert_eq!(outputs.fan, Logical::On);
    assert_eq!(outputs.power, Logical::On);

    // The near-empty hopper was reported at mode entry.
    let events = harness.events();
    assert!(harness.fired(&events, "Pellet_Level_Low"));
}

#[test]
fn smoke_cycles_auger_and_obeys_timer_shutdown() {
    let mut control = Control::default();
    control.mode = Mode::Smoke;
    control.safety.startup_temp = 75.0;
    control.safety.after_start_temp = 160.0;
    let mut harness = Harness::new(
        "smoke-timer",
        SimParams::default(),
        Settings::default(),
        control,
    );
    harness.grill.lock().set_temperature(160.0);

    // Arm a 90 second cook timer with auto-shutdown.
    let end = harness.clock.wall_epoch() + 90.0;
    harness
        .store
        .update_control(|c| {
            c.notify_req.timer = true;
            c.notify_data.timer_shutdown = true;
            c.timer.start = end - 90.0;
            c.timer.end = end;
        })
        .unwrap();

    harness.run_cycle(Mode::Smoke);

    assert!(harness.clock.elapsed() >= 90.0);
    assert!(harness.clock.elapsed() < 180.0, "loop kept running after expiry");

    let control = harness.control();
    assert_eq!(control.mode, Mode::Shutdown);
    assert!(control.updated);
    assert!(!control.notify_req.timer);
    assert_eq!(control.timer.end, 0.0);

    let events = harness.events();
    assert!(harness.fired(&events, "Timer_Expired"));

    // The auger actually cycled while smoking.
    assert!(harness.grill.lock().auger_cycles() >= 1);
}

#[test]
fn flame_out_requests_reignite_then_errors_when_spent() {
    let mut control = Control::default();
    control.mode = Mode::Smoke;
    control.safety.startup_temp = 120.0;
    control.safety.after_start_temp = 130.0;
    control.safety.reignite_retries = 2;
    let mut harness = Harness::new(
        "flameout",
        SimParams::default().dead_fire(),
        Settings::default(),
        control,
    );
    harness.grill.lock().set_temperature(130.0);

    harness.run_cycle(Mode::Smoke);

    let control = harness.control();
    assert_eq!(control.mode, Mode::Reignite);
    assert!(control.updated);
    assert_eq!(control.safety.reignite_retries, 1);
    assert_eq!(control.safety.reignite_last_state, Mode::Smoke);
    assert!(harness.display.showed("Re-Ignite"));
    // The retry attempt itself is not an error notification.
    let events = harness.events();
    assert!(!harness.fired(&events, "Grill_Error_02"));

    // With the retry budget exhausted the same drop is terminal.
    harness
        .store
        .update_control(|c| {
            c.mode = Mode::Smoke;
            c.updated = false;
            c.safety.reignite_retries = 0;
        })
        .unwrap();
    harness.run_cycle(Mode::Smoke);

    let control = harness.control();
    assert_eq!(control.mode, Mode::Error);
    assert!(control.updated);
    assert!(harness.display.showed("ERROR"));
    let events = harness.events();
    assert!(harness.fired(&events, "Grill_Error_02"));
}

#[test]
fn hold_trips_on_max_temperature() {
    let mut settings = Settings::default();
    settings.safety.max_temp = 500.0;
    let mut control = Control::default();
    control.mode = Mode::Hold;
    control.setpoints.grill = 225.0;
    control.safety.startup_temp = 75.0;
    control.safety.after_start_temp = 150.0;
    let mut harness = Harness::new("maxtemp", SimParams::default(), settings, control);
    harness.grill.lock().set_temperature(505.0);

    harness.run_cycle(Mode::Hold);

    assert!(harness.clock.elapsed() < 10.0, "trip was not immediate");
    let control = harness.control();
    assert_eq!(control.mode, Mode::Error);
    assert!(control.updated);
    assert!(harness.display.showed("ERROR"));
    let events = harness.events();
    assert!(harness.fired(&events, "Grill_Error_01"));

    let outputs = harness.outputs();
    assert_eq!(outputs.auger, Logical::Off);
    assert_eq!(outputs.igniter, Logical::Off);
}

#[test]
fn probe_setpoint_with_auto_shutdown() {
    let mut control = Control::default();
    control.mode = Mode::Hold;
    control.setpoints.grill = 225.0;
    control.setpoints.probe1 = 195.0;
    control.notify_req.probe1 = true;
    control.notify_data.p1_shutdown = true;
    control.safety.startup_temp = 75.0;
    control.safety.after_start_temp = 160.0;
    let mut harness = Harness::new("probe1", SimParams::default(), Settings::default(), control);
    {
        let mut grill = harness.grill.lock();
        grill.set_temperature(160.0);
        grill.set_probe_temps(200.0, 70.0);
    }

    harness.run_cycle(Mode::Hold);

    let control = harness.control();
    assert_eq!(control.mode, Mode::Shutdown);
    assert!(control.updated);
    assert!(!control.notify_req.probe1);
    assert!(!control.notify_data.p1_shutdown);
    let events = harness.events();
    assert!(harness.fired(&events, "Probe1_Temp_Achieved"));
}

#[test]
fn hold_regulates_toward_the_setpoint() {
    let mut control = Control::default();
    control.mode = Mode::Hold;
    control.setpoints.grill = 225.0;
    control.safety.startup_temp = 75.0;
    control.safety.after_start_temp = 170.0;
    let mut harness = Harness::new("hold", SimParams::default(), Settings::default(), control);
    harness.grill.lock().set_temperature(170.0);

    // Let the cook run for 40 simulated minutes, then shut down via timer.
    let end = harness.clock.wall_epoch() + 2400.0;
    harness
        .store
        .update_control(|c| {
            c.notify_req.timer = true;
            c.notify_data.timer_shutdown = true;
            c.timer.end = end;
        })
        .unwrap();

    harness.run_cycle(Mode::Hold);

    let temp = harness.grill.lock().temperature();
    assert!(
        (temp - 225.0).abs() < 20.0,
        "hold settled at {temp} instead of near 225"
    );
    // The stepwise table kept the fan duty on one of its bands.
    let duty = harness.grill.lock().fan_duty();
    assert!(
        [55, 70, 85, 95].contains(&duty),
        "unexpected fan duty {duty}"
    );
    assert_eq!(harness.control().mode, Mode::Shutdown);
}

#[test]
fn shutdown_runs_its_timer_and_powers_down() {
    let mut settings = Settings::default();
    settings.globals.shutdown_timer = 60.0;
    let mut control = Control::default();
    control.mode = Mode::Shutdown;
    let mut harness = Harness::new("shutdown", SimParams::default(), settings, control);
    harness.grill.lock().set_temperature(200.0);

    harness.run_cycle(Mode::Shutdown);

    assert!(harness.clock.elapsed() >= 60.0);
    let outputs = harness.outputs();
    assert_eq!(outputs.auger, Logical::Off);
    assert_eq!(outputs.igniter, Logical::Off);
    assert_eq!(outputs.fan, Logical::Off);
    assert_eq!(outputs.power, Logical::Off);
    assert_eq!(harness.grill.lock().fan_duty(), 0);
}

#[test]
fn monitor_keeps_outputs_off_and_enforces_the_ceiling() {
    let mut control = Control::default();
    control.mode = Mode::Monitor;
    let mut harness = Harness::new("monitor", SimParams::default(), Settings::default(), control);
    harness.grill.lock().set_temperature(300.0);

    // Stand in for the user pressing stop after a while.
    let store = harness.store.clone();
    harness.display.on_poll(move |polls| {
        if polls == 2000 {
            let _ = store.update_control(|c| {
                c.mode = Mode::Stop;
                c.updated = true;
            });
        }
    });
    harness.run_monitor();

    let outputs = harness.outputs();
    assert_eq!(outputs.power, Logical::Off);
    assert_eq!(outputs.auger, Logical::Off);
    assert_eq!(outputs.fan, Logical::Off);
    assert_eq!(outputs.igniter, Logical::Off);
    assert_eq!(harness.control().mode, Mode::Stop);

    // The ceiling still applies while the OEM controller drives the fire.
    let mut control = Control::default();
    control.mode = Mode::Monitor;
    let mut harness = Harness::new(
        "monitor-trip",
        SimParams::default(),
        Settings::default(),
        control,
    );
    harness.grill.lock().set_temperature(560.0);
    harness.run_monitor();

    assert_eq!(harness.control().mode, Mode::Error);
    let events = harness.events();
    assert!(harness.fired(&events, "Grill_Error_01"));
}

#[test]
fn manual_mode_mirrors_requested_actuators() {
    let mut control = Control::default();
    control.mode = Mode::Manual;
    control.manual.change = true;
    control.manual.fan = true;
    control.manual.pwm = Some(40);
    let mut harness = Harness::new("manual", SimParams::default(), Settings::default(), control);

    let store = harness.store.clone();
    harness.display.on_poll(move |polls| {
        if polls == 500 {
            let _ = store.update_control(|c| {
                c.mode = Mode::Stop;
                c.updated = true;
            });
        }
    });
    harness.run_manual();

    // The change flag was consumed and the requested duty applied.
    let control = harness.control();
    assert!(!control.manual.change);
    assert_eq!(harness.grill.lock().fan_duty(), 40);

    // Manual exits with everything parked.
    let outputs = harness.outputs();
    assert_eq!(outputs.fan, Logical::Off);
    assert_eq!(outputs.auger, Logical::Off);
    assert_eq!(outputs.igniter, Logical::Off);
    assert_eq!(outputs.power, Logical::Off);
}

#[test]
fn orchestrator_chains_a_full_cook() {
    let mut control = Control::default();
    control.mode = Mode::Startup;
    control.updated = true;
    control.safety.reignite_retries = 0;
    let mut settings = Settings::default();
    settings.globals.shutdown_timer = 45.0;
    let mut harness = Harness::new(
        "orchestrate",
        ambient(SimParams::default(), 75.0),
        settings,
        control,
    );

    // Startup runs its 240 seconds, then chains into Smoke (no setpoint).
    harness.orchestrator_step();
    let control = harness.control();
    assert_eq!(control.mode, Mode::Smoke);
    assert!(control.updated);

    // Arm a timer so Smoke hands over to Shutdown on its own.
    let end = harness.clock.wall_epoch() + 60.0;
    harness
        .store
        .update_control(|c| {
            c.notify_req.timer = true;
            c.notify_data.timer_shutdown = true;
            c.timer.end = end;
        })
        .unwrap();
    harness.orchestrator_step();
    assert_eq!(harness.control().mode, Mode::Shutdown);

    // Shutdown drains and chains into Stop.
    harness.orchestrator_step();
    assert_eq!(harness.control().mode, Mode::Stop);
    assert!(harness.control().updated);

    // Stop parks the hardware and restores the re-ignite budget.
    harness.orchestrator_step();
    let control = harness.control();
    assert!(!control.updated);
    assert_eq!(
        control.safety.reignite_retries,
        Settings::default().safety.reignite_retries
    );
    let outputs = harness.outputs();
    assert_eq!(outputs.auger, Logical::Off);
    assert_eq!(outputs.igniter, Logical::Off);
    assert_eq!(outputs.fan, Logical::Off);

    let events = harness.events();
    assert!(harness.fired(&events, "Timer_Expired"));
}
