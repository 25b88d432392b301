//! The grill model and the simulated devices wrapped around it.

use ember_hal::clock::Clock;
use ember_hal::relay::{GpioBackend, InPins, OutPins, PinLevel, TriggerLevel};
use ember_hal::{
    DistanceSensor, HalError, Logical, ProbeReadings, ProbeSample, ProbeSampler, SelectorSwitch,
    StatusData, StatusDisplay,
};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use thermal::probe::{temp_to_resistance, ProbeProfile, Units};
use tracing::trace;

/// Integration step ceiling; large jumps are chopped into substeps.
const MAX_STEP_SECS: f64 = 0.25;

/// Tunable physics for the grill model. Defaults approximate a mid-size
/// smoker: roughly 120F at minimum auger duty, near 590F flat out.
#[derive(Debug, Clone, Copy)]
pub struct SimParams {
    /// Outside air temperature, F.
    pub ambient: f64,
    /// Pit temperature above which fuel keeps burning without the igniter.
    pub ignition_temp: f64,
    /// Fuel units fed per second of auger run time.
    pub feed_rate: f64,
    /// Fuel units burned per second while lit.
    pub burn_rate: f64,
    /// Degrees of pit-temperature rise per fuel unit burned.
    pub heat_per_fuel: f64,
    /// Direct heating from the igniter element, degrees per second.
    pub igniter_heat: f64,
    /// Newtonian loss coefficient, fraction of the rise lost per second.
    pub loss_coeff: f64,
    /// Meat-probe approach rate toward pit temperature, per second.
    pub probe_coupling: f64,
    /// Uniform sensor noise amplitude, degrees.
    pub noise: f64,
    /// Hopper drain, percent per second of auger run time.
    pub hopper_drain: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            ambient: 70.0,
            ignition_temp: 110.0,
            feed_rate: 1.0,
            burn_rate: 2.0,
            heat_per_fuel: 2.1,
            igniter_heat: 0.35,
            loss_coeff: 0.004,
            probe_coupling: 0.0015,
            noise: 0.5,
            hopper_drain: 0.002,
        }
    }
}

impl SimParams {
    /// A grill whose igniter is broken and whose pit never self-sustains.
    /// Useful for driving the flame-out and re-ignite paths.
    pub fn dead_fire(mut self) -> Self {
        self.igniter_heat = 0.0;
        self.heat_per_fuel = 0.0;
        self
    }
}

/// The mutable grill state shared by all simulated devices.
pub struct GrillSim {
    params: SimParams,
    temp: f64,
    probe1: f64,
    probe2: f64,
    fuel: f64,
    hopper_level: f64,
    power: Logical,
    auger: Logical,
    fan: Logical,
    igniter: Logical,
    fan_duty: u32,
    selector: SelectorSwitch,
    probe1_connected: bool,
    probe2_connected: bool,
    auger_cycles: usize,
    last_step: Option<Instant>,
}

/// Handle shared between the simulated devices.
pub type SharedGrill = Arc<Mutex<GrillSim>>;

impl GrillSim {
    pub fn new(params: SimParams) -> SharedGrill {
        Arc::new(Mutex::new(Self {
            temp: params.ambient,
            probe1: params.ambient,
            probe2: params.ambient,
            fuel: 0.0,
            hopper_level: 100.0,
            power: Logical::Off,
            auger: Logical::Off,
            fan: Logical::Off,
            igniter: Logical::Off,
            fan_duty: 0,
            selector: SelectorSwitch::Controller,
            probe1_connected: true,
            probe2_connected: true,
            auger_cycles: 0,
            last_step: None,
            params,
        }))
    }

    /// Advances the model to `now`.
    pub fn step_to(&mut self, now: Instant) {
        let Some(last) = self.last_step else {
            self.last_step = Some(now);
            return;
        };
        let mut remaining = now.saturating_duration_since(last).as_secs_f64();
        self.last_step = Some(now);
        while remaining > 0.0 {
            let dt = remaining.min(MAX_STEP_SECS);
            self.step(dt);
            remaining -= dt;
        }
    }

    fn step(&mut self, dt: f64) {
        let p = self.params;

        if self.auger.is_on() {
            let fed = p.feed_rate * dt;
            self.fuel += fed;
            self.hopper_level = (self.hopper_level - p.hopper_drain * dt).max(0.0);
        }

        let lit = self.igniter.is_on() || self.temp > p.ignition_temp;
        let burned = if lit {
            let burned = (p.burn_rate * dt).min(self.fuel);
            self.fuel -= burned;
            burned
        } else {
            0.0
        };

        let mut heat = burned * p.heat_per_fuel;
        if self.igniter.is_on() {
            heat += p.igniter_heat * dt;
        }
        self.temp += heat - (self.temp - p.ambient) * p.loss_coeff * dt;

        self.probe1 += (self.temp - self.probe1) * p.probe_coupling * dt;
        self.probe2 += (self.temp - self.probe2) * p.probe_coupling * dt;

        trace!(
            temp = self.temp,
            fuel = self.fuel,
            lit,
            "grill model stepped"
        );
    }

    pub fn temperature(&self) -> f64 {
        self.temp
    }

    /// Forces the pit temperature, e.g. to stage an over-temperature trip.
    pub fn set_temperature(&mut self, temp: f64) {
        self.temp = temp;
    }

    pub fn set_probe_temps(&mut self, probe1: f64, probe2: f64) {
        self.probe1 = probe1;
        self.probe2 = probe2;
    }

    pub fn set_hopper_level(&mut self, percent: f64) {
        self.hopper_level = percent;
    }

    pub fn set_selector(&mut self, selector: SelectorSwitch) {
        self.selector = selector;
    }

    pub fn set_probe_connected(&mut self, probe1: bool, probe2: bool) {
        self.probe1_connected = probe1;
        self.probe2_connected = probe2;
    }

    pub fn outputs(&self) -> (Logical, Logical, Logical, Logical) {
        (self.power, self.auger, self.fan, self.igniter)
    }

    pub fn fan_duty(&self) -> u32 {
        self.fan_duty
    }

    /// Number of off-to-on auger transitions seen so far.
    pub fn auger_cycles(&self) -> usize {
        self.auger_cycles
    }
}

/// GPIO backend wired to the grill model. Plays the part of the relay board
/// and the wiring loom: it remembers raw pin levels for readback and applies
/// the polarity-decoded meaning to the model.
pub struct SimGpio {
    grill: SharedGrill,
    outpins: OutPins,
    inpins: InPins,
    trigger: TriggerLevel,
    levels: std::collections::HashMap<u8, PinLevel>,
}

impl SimGpio {
    pub fn new(grill: SharedGrill, outpins: OutPins, inpins: InPins, trigger: TriggerLevel) -> Self {
        Self {
            grill,
            outpins,
            inpins,
            trigger,
            levels: std::collections::HashMap::new(),
        }
    }

    fn apply(&mut self, pin: u8, state: Logical) {
        let mut grill = self.grill.lock();
        if pin == self.outpins.power {
            grill.power = state;
        } else if pin == self.outpins.auger {
            if state.is_on() && !grill.auger.is_on() {
                grill.auger_cycles += 1;
            }
            grill.auger = state;
        } else if pin == self.outpins.fan {
            grill.fan = state;
        } else if pin == self.outpins.igniter {
            grill.igniter = state;
        }
    }
}

impl GpioBackend for SimGpio {
    fn setup_input_pullup(&mut self, pin: u8) -> Result<(), HalError> {
        self.levels.insert(pin, PinLevel::High);
        Ok(())
    }

    fn write_pin(&mut self, pin: u8, level: PinLevel) -> Result<(), HalError> {
        self.levels.insert(pin, level);
        self.apply(pin, self.trigger.logical_for(level));
        Ok(())
    }

    fn read_pin(&mut self, pin: u8) -> Result<PinLevel, HalError> {
        if pin == self.inpins.selector {
            return Ok(match self.grill.lock().selector {
                SelectorSwitch::Controller => PinLevel::Low,
                SelectorSwitch::Oem => PinLevel::High,
            });
        }
        Ok(*self.levels.get(&pin).unwrap_or(&PinLevel::Low))
    }

    fn configure_pwm(&mut self, _pin: u8, _frequency_hz: u32, _range: u32) -> Result<(), HalError> {
        Ok(())
    }

    fn set_pwm_duty(&mut self, pin: u8, duty: u32) -> Result<(), HalError> {
        if pin == self.outpins.pwm {
            self.grill.lock().fan_duty = duty;
        }
        Ok(())
    }
}

/// Simulated three-port probe ADC. Each read steps the model to the current
/// simulated time, then reports temperatures with a little uniform noise and
/// the back-computed thermistor resistances.
pub struct SimProbes {
    grill: SharedGrill,
    clock: Arc<dyn Clock>,
    units: Units,
    profiles: Option<(ProbeProfile, ProbeProfile, ProbeProfile)>,
}

impl SimProbes {
    pub fn new(grill: SharedGrill, clock: Arc<dyn Clock>, units: Units) -> Self {
        Self {
            grill,
            clock,
            units,
            profiles: None,
        }
    }

    fn resistance_for(&self, temp: f64, profile: Option<&ProbeProfile>) -> f64 {
        profile
            .and_then(|p| temp_to_resistance(temp, p.a, p.b, p.c, self.units))
            .unwrap_or(0.0)
    }
}

impl ProbeSampler for SimProbes {
    fn set_profiles(&mut self, grill: ProbeProfile, probe1: ProbeProfile, probe2: ProbeProfile) {
        self.profiles = Some((grill, probe1, probe2));
    }

    fn read_all(&mut self) -> Result<ProbeSample, HalError> {
        let now = self.clock.monotonic();
        let mut rng = rand::thread_rng();
        let mut grill = self.grill.lock();
        grill.step_to(now);

        let noise = grill.params.noise;
        let mut jitter = || {
            if noise > 0.0 {
                rng.gen_range(-noise..noise)
            } else {
                0.0
            }
        };

        let grill_temp = grill.temp + jitter();
        let probe1_temp = if grill.probe1_connected {
            grill.probe1 + jitter()
        } else {
            f64::NAN
        };
        let probe2_temp = if grill.probe2_connected {
            grill.probe2 + jitter()
        } else {
            f64::NAN
        };
        drop(grill);

        let (gp, p1, p2) = match &self.profiles {
            Some((gp, p1, p2)) => (Some(gp), Some(p1), Some(p2)),
            None => (None, None, None),
        };

        Ok(ProbeSample {
            grill_temp,
            probe1_temp,
            probe2_temp,
            grill_resistance: self.resistance_for(grill_temp, gp),
            probe1_resistance: self.resistance_for(probe1_temp, p1),
            probe2_resistance: self.resistance_for(probe2_temp, p2),
        })
    }
}

/// Simulated hopper level sensor.
pub struct SimHopper {
    grill: SharedGrill,
}

impl SimHopper {
    pub fn new(grill: SharedGrill) -> Self {
        Self { grill }
    }
}

impl DistanceSensor for SimHopper {
    fn hopper_level(&mut self) -> Result<f64, HalError> {
        Ok(self.grill.lock().hopper_level)
    }
}

/// Display stand-in that records what the controller showed. Tests can
/// register a poll hook to stand in for button input: it runs on every
/// `poll_events` with the number of polls so far, which is the natural place
/// to inject mid-cook interventions.
#[derive(Default)]
pub struct SimDisplay {
    pub texts: Vec<String>,
    pub last_status: Option<(ProbeReadings, StatusData)>,
    pub status_updates: usize,
    polls: u64,
    on_poll: Option<Box<dyn FnMut(u64) + Send>>,
}

impl SimDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook invoked on every event poll.
    pub fn on_poll(&mut self, hook: impl FnMut(u64) + Send + 'static) {
        self.on_poll = Some(Box::new(hook));
    }

    /// True if the given message was ever shown.
    pub fn showed(&self, message: &str) -> bool {
        self.texts.iter().any(|t| t == message)
    }
}

impl StatusDisplay for SimDisplay {
    fn status(&mut self, readings: &ProbeReadings, status: &StatusData) -> Result<(), HalError> {
        self.last_status = Some((*readings, status.clone()));
        self.status_updates += 1;
        Ok(())
    }

    fn text(&mut self, message: &str) -> Result<(), HalError> {
        self.texts.push(message.to_string());
        Ok(())
    }

    fn poll_events(&mut self) {
        self.polls += 1;
        if let Some(hook) = self.on_poll.as_mut() {
            hook(self.polls);
        }
    }
}
