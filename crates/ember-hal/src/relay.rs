//! Relay-board platform over a raw GPIO backend.
//!
//! Relay boards come in active-low and active-high flavours; the trigger
//! level decides which pin level energises a relay. That inversion lives
//! entirely here: everything above this layer speaks logical on/off.

use crate::{GrillPlatform, HalError, Logical, OutputState, SelectorSwitch};

/// PWM carrier frequency for the combustion fan.
pub const PWM_FREQUENCY_HZ: u32 = 20_000;
/// PWM range: duty values are 0..=100 percent.
pub const PWM_RANGE: u32 = 100;
/// Duty applied at platform construction.
const INITIAL_PWM_DUTY: u8 = 70;
/// Duty pair alternated by `fan_toggle`.
const TOGGLE_DUTY_HIGH: u8 = 65;
const TOGGLE_DUTY_LOW: u8 = 25;

/// Raw pin level on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinLevel {
    Low,
    High,
}

/// Relay-board polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TriggerLevel {
    /// Relay energises on a low pin (common opto-isolated boards).
    #[default]
    ActiveLow,
    /// Relay energises on a high pin.
    ActiveHigh,
}

impl TriggerLevel {
    /// Pin level that produces the given logical state on this board.
    pub fn level_for(self, state: Logical) -> PinLevel {
        match (self, state) {
            (TriggerLevel::ActiveLow, Logical::On) => PinLevel::Low,
            (TriggerLevel::ActiveLow, Logical::Off) => PinLevel::High,
            (TriggerLevel::ActiveHigh, Logical::On) => PinLevel::High,
            (TriggerLevel::ActiveHigh, Logical::Off) => PinLevel::Low,
        }
    }

    /// Logical state a pin level represents on this board.
    pub fn logical_for(self, level: PinLevel) -> Logical {
        match (self, level) {
            (TriggerLevel::ActiveLow, PinLevel::Low) => Logical::On,
            (TriggerLevel::ActiveLow, PinLevel::High) => Logical::Off,
            (TriggerLevel::ActiveHigh, PinLevel::High) => Logical::On,
            (TriggerLevel::ActiveHigh, PinLevel::Low) => Logical::Off,
        }
    }
}

/// Output pin assignment, BCM numbering.
#[derive(Debug, Clone, Copy)]
pub struct OutPins {
    pub power: u8,
    pub auger: u8,
    pub fan: u8,
    pub igniter: u8,
    pub pwm: u8,
}

/// Input pin assignment, BCM numbering.
#[derive(Debug, Clone, Copy)]
pub struct InPins {
    pub selector: u8,
}

/// Minimal GPIO driver interface a platform backend must provide.
pub trait GpioBackend {
    fn setup_input_pullup(&mut self, pin: u8) -> Result<(), HalError>;
    fn write_pin(&mut self, pin: u8, level: PinLevel) -> Result<(), HalError>;
    fn read_pin(&mut self, pin: u8) -> Result<PinLevel, HalError>;
    fn configure_pwm(&mut self, pin: u8, frequency_hz: u32, range: u32) -> Result<(), HalError>;
    fn set_pwm_duty(&mut self, pin: u8, duty: u32) -> Result<(), HalError>;
}

/// The grill platform as wired on the relay hat: four relays, one hardware
/// PWM channel and the selector switch.
pub struct RelayPlatform<B: GpioBackend> {
    backend: B,
    outpins: OutPins,
    inpins: InPins,
    trigger: TriggerLevel,
    toggle_duty_high: bool,
}

impl<B: GpioBackend> RelayPlatform<B> {
    /// Initialises the board: selector input pulled up, every relay off, PWM
    /// configured at 20 kHz over a 0–100 range.
    pub fn new(
        mut backend: B,
        outpins: OutPins,
        inpins: InPins,
        trigger: TriggerLevel,
    ) -> Result<Self, HalError> {
        backend.setup_input_pullup(inpins.selector)?;
        let off = trigger.level_for(Logical::Off);
        for pin in [outpins.power, outpins.auger, outpins.fan, outpins.igniter] {
            backend.write_pin(pin, off)?;
        }
        backend.configure_pwm(outpins.pwm, PWM_FREQUENCY_HZ, PWM_RANGE)?;
        backend.set_pwm_duty(outpins.pwm, INITIAL_PWM_DUTY as u32)?;
        Ok(Self {
            backend,
            outpins,
            inpins,
            trigger,
            toggle_duty_high: false,
        })
    }

    fn write(&mut self, pin: u8, state: Logical) -> Result<(), HalError> {
        self.backend.write_pin(pin, self.trigger.level_for(state))
    }

    fn read(&mut self, pin: u8) -> Result<Logical, HalError> {
        Ok(self.trigger.logical_for(self.backend.read_pin(pin)?))
    }
}

impl<B: GpioBackend> GrillPlatform for RelayPlatform<B> {
    fn fan_on(&mut self) -> Result<(), HalError> {
        self.write(self.outpins.fan, Logical::On)
    }

    fn fan_off(&mut self) -> Result<(), HalError> {
        self.write(self.outpins.fan, Logical::Off)
    }

    fn fan_toggle(&mut self) -> Result<(), HalError> {
        let next = match self.read(self.outpins.fan)? {
            Logical::On => Logical::Off,
            Logical::Off => Logical::On,
        };
        self.write(self.outpins.fan, next)?;
        self.toggle_duty_high = !self.toggle_duty_high;
        let duty = if self.toggle_duty_high {
            TOGGLE_DUTY_HIGH
        } else {
            TOGGLE_DUTY_LOW
        };
        self.fan_duty_cycle(duty)
    }

    fn auger_on(&mut self) -> Result<(), HalError> {
        self.write(self.outpins.auger, Logical::On)
    }

    fn auger_off(&mut self) -> Result<(), HalError> {
        self.write(self.outpins.auger, Logical::Off)
    }

    fn igniter_on(&mut self) -> Result<(), HalError> {
        self.write(self.outpins.igniter, Logical::On)
    }

    fn igniter_off(&mut self) -> Result<(), HalError> {
        self.write(self.outpins.igniter, Logical::Off)
    }

    fn power_on(&mut self) -> Result<(), HalError> {
        self.write(self.outpins.power, Logical::On)
    }

    fn power_off(&mut self) -> Result<(), HalError> {
        self.write(self.outpins.power, Logical::Off)
    }

    fn fan_duty_cycle(&mut self, percent: u8) -> Result<(), HalError> {
        self.backend
            .set_pwm_duty(self.outpins.pwm, percent.min(100) as u32)
    }

    fn output_status(&mut self) -> Result<OutputState, HalError> {
        Ok(OutputState {
            power: self.read(self.outpins.power)?,
            auger: self.read(self.outpins.auger)?,
            fan: self.read(self.outpins.fan)?,
            igniter: self.read(self.outpins.igniter)?,
        })
    }

    fn input_status(&mut self) -> Result<SelectorSwitch, HalError> {
        // Pulled up: the switch shorts the pin low in controller position.
        Ok(match self.backend.read_pin(self.inpins.selector)? {
            PinLevel::Low => SelectorSwitch::Controller,
            PinLevel::High => SelectorSwitch::Oem,
        })
    }
}
