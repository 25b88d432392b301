//! A simple pit simulation to demonstrate and tune the cycle-ratio PID.

use std::time::{Duration, Instant};
use thermal::pid::{CycleRatioPid, FanCurve};
use thermal::queue::TempQueue;
use thermal::safety::{SafetyEnvelope, SafetyVerdict};
use thermal::Units;

/// A lumped model of a pellet grill: pellets fed at the cycle ratio burn into
/// heat, losses follow Newton's law of cooling.
struct GrillModel {
    temperature: f64,
    ambient_temp: f64,
    /// Degrees per second of full-ratio pellet feed.
    heat_coefficient: f64,
    /// Degrees per second per degree above ambient.
    cooling_coefficient: f64,
}

impl GrillModel {
    fn new(ambient_temp: f64) -> Self {
        Self {
            temperature: ambient_temp,
            ambient_temp,
            heat_coefficient: 2.1,
            cooling_coefficient: 0.004,
        }
    }

    fn update(&mut self, cycle_ratio: f64, dt: f64) {
        let heating = cycle_ratio * self.heat_coefficient * dt;
        let cooling = (self.temperature - self.ambient_temp) * self.cooling_coefficient * dt;
        self.temperature += heating - cooling;
    }
}

fn main() {
    let setpoint = 225.0;
    let hold_cycle_time = 20.0;
    let sim_time_s = 3600.0;

    let mut model = GrillModel::new(70.0);
    let mut queue = TempQueue::new(TempQueue::GRILL_WINDOW, Units::Fahrenheit);
    let mut pid = CycleRatioPid::new(
        60.0,  // PB
        180.0, // Ti
        45.0,  // Td
        0.5,   // center
        0.15,  // u_min
        1.0,   // u_max
        hold_cycle_time,
        FanCurve::default(),
    );

    let envelope = SafetyEnvelope {
        startup_temp: 75.0,
        max_temp: 550.0,
    };

    let t0 = Instant::now();
    pid.set_target(setpoint, t0);

    println!("time_s, setpoint, temp, cycle_ratio, fan_duty");

    let mut current_time = 0.0;
    while current_time < sim_time_s {
        // One auger period per PID update, as the control loop does it.
        let now = t0 + Duration::from_secs_f64(current_time);
        queue.enqueue(model.temperature);
        let cycle_ratio = pid.update(queue.average(), now);
        let fan_duty = pid.compute_fan_speed();

        match envelope.check_work(queue.average(), 1) {
            SafetyVerdict::Ok => {}
            verdict => {
                println!("\nsafety verdict {verdict:?}, stopping");
                break;
            }
        }

        for _ in 0..(hold_cycle_time as usize) {
            model.update(cycle_ratio, 1.0);
        }

        println!(
            "{:.0}, {:.1}, {:.2}, {:.3}, {:.0}",
            current_time, setpoint, model.temperature, cycle_ratio, fan_duty
        );
        current_time += hold_cycle_time;
    }
}
