//! Thermistor probe models.
//!
//! A grill probe is an NTC thermistor in a voltage divider: the ADC measures
//! the divider voltage, the divider equation recovers the thermistor
//! resistance, and the Steinhart–Hart equation maps resistance to temperature.
//!
//! ```text
//! R = Rd * (Vs / Vmeasured - 1)
//! 1/T_K = A + B*ln(R) + C*(ln(R))^3
//! ```

use num_traits::Float;

/// Temperature units used throughout the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Units {
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "F"))]
    Fahrenheit,
    #[cfg_attr(feature = "serde", serde(rename = "C"))]
    Celsius,
}

impl Units {
    /// Converts a temperature in Kelvin into these units.
    pub fn from_kelvin(self, kelvin: f64) -> f64 {
        let celsius = kelvin - 273.15;
        match self {
            Units::Celsius => celsius,
            Units::Fahrenheit => celsius * 9.0 / 5.0 + 32.0,
        }
    }

    /// Converts a temperature in these units into Kelvin.
    pub fn to_kelvin(self, temp: f64) -> f64 {
        let celsius = match self {
            Units::Celsius => temp,
            Units::Fahrenheit => (temp - 32.0) * 5.0 / 9.0,
        };
        celsius + 273.15
    }

    /// The widest plausible reading for a grill probe in these units. Samples
    /// outside this range indicate an open or shorted probe.
    pub fn plausible_range(self) -> (f64, f64) {
        match self {
            Units::Fahrenheit => (-100.0, 1000.0),
            Units::Celsius => (-75.0, 540.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Units::Fahrenheit => "F",
            Units::Celsius => "C",
        }
    }
}

/// Calibration profile for one probe: the divider supply voltage and fixed
/// resistor, and the three Steinhart–Hart coefficients.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProbeProfile {
    /// Divider supply voltage.
    pub vs: f64,
    /// Fixed divider resistance in ohms.
    pub rd: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub name: String,
}

impl ProbeProfile {
    /// Recovers the thermistor resistance from a measured divider voltage.
    /// Returns `None` when the reading is outside the divider's range (open or
    /// shorted probe).
    pub fn divider_resistance(&self, v_measured: f64) -> Option<f64> {
        if !(v_measured > 0.0) || v_measured >= self.vs {
            return None;
        }
        Some(self.rd * (self.vs / v_measured - 1.0))
    }

    /// Full conversion chain: divider voltage to temperature in `units`.
    pub fn temperature(&self, v_measured: f64, units: Units) -> Option<f64> {
        let resistance = self.divider_resistance(v_measured)?;
        let kelvin = SteinhartHart::new(self.a, self.b, self.c).resistance_to_kelvin(resistance)?;
        Some(units.from_kelvin(kelvin))
    }
}

/// The three-coefficient Steinhart–Hart thermistor model.
///
/// `1/T = a + b*ln(R) + c*(ln(R))^3`, temperature in Kelvin.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SteinhartHart<F: Float> {
    pub a: F,
    pub b: F,
    pub c: F,
}

impl<F: Float> SteinhartHart<F> {
    pub fn new(a: F, b: F, c: F) -> Self {
        Self { a, b, c }
    }

    /// Converts a thermistor resistance in ohms to Kelvin. Returns `None` for
    /// non-positive resistance or a non-physical (non-positive) temperature.
    pub fn resistance_to_kelvin(&self, resistance: F) -> Option<F> {
        if resistance <= F::zero() {
            return None;
        }
        let ln_r = resistance.ln();
        let temp_inv = self.a + self.b * ln_r + self.c * ln_r.powi(3);
        if temp_inv <= F::zero() {
            None
        } else {
            Some(F::one() / temp_inv)
        }
    }

    /// Inverts the model: the resistance at which the thermistor reads the
    /// given temperature. Used by the probe-tuning flow to project resistance
    /// targets from temperatures.
    pub fn kelvin_to_resistance(&self, kelvin: F) -> Option<F> {
        if kelvin <= F::zero() {
            return None;
        }
        let two = F::from(2.0)?;
        let three = F::from(3.0)?;
        let x = (F::one() / (two * self.c)) * (self.a - F::one() / kelvin);
        let y = ((self.b / (three * self.c)).powi(3) + x.powi(2)).sqrt();
        let resistance = ((y - x).cbrt() - (y + x).cbrt()).exp();
        if resistance.is_finite() {
            Some(resistance)
        } else {
            None
        }
    }
}

/// Fits Steinhart–Hart coefficients from three calibration points of
/// (temperature in `units`, resistance in ohms). Returns `None` when the
/// points are degenerate (equal resistances or non-physical temperatures).
pub fn calc_coefficients(
    temps: [f64; 3],
    resistances: [f64; 3],
    units: Units,
) -> Option<(f64, f64, f64)> {
    let [t1, t2, t3] = temps.map(|t| units.to_kelvin(t));
    let [r1, r2, r3] = resistances;
    if r1 <= 0.0 || r2 <= 0.0 || r3 <= 0.0 || t1 <= 0.0 || t2 <= 0.0 || t3 <= 0.0 {
        return None;
    }

    let l1 = r1.ln();
    let l2 = r2.ln();
    let l3 = r3.ln();
    if l1 == l2 || l1 == l3 || l2 == l3 {
        return None;
    }

    let y1 = 1.0 / t1;
    let y2 = 1.0 / t2;
    let y3 = 1.0 / t3;

    let g2 = (y2 - y1) / (l2 - l1);
    let g3 = (y3 - y1) / (l3 - l1);

    let c = ((g3 - g2) / (l3 - l2)) / (l1 + l2 + l3);
    let b = g2 - c * (l1 * l1 + l1 * l2 + l2 * l2);
    let a = y1 - (b + l1 * l1 * c) * l1;

    if a.is_finite() && b.is_finite() && c.is_finite() {
        Some((a, b, c))
    } else {
        None
    }
}

/// Temperature in `units` to thermistor resistance, for probe tuning.
pub fn temp_to_resistance(temp: f64, a: f64, b: f64, c: f64, units: Units) -> Option<f64> {
    SteinhartHart::new(a, b, c).kelvin_to_resistance(units.to_kelvin(temp))
}

/// Thermistor resistance to temperature in `units`, for probe tuning.
pub fn resistance_to_temp(resistance: f64, a: f64, b: f64, c: f64, units: Units) -> Option<f64> {
    SteinhartHart::new(a, b, c)
        .resistance_to_kelvin(resistance)
        .map(|k| units.from_kelvin(k))
}
