use float_cmp::approx_eq;
use std::time::{Duration, Instant};
use thermal::pid::{CycleRatioPid, FanCurve};
use thermal::probe::{self, ProbeProfile, Units};
use thermal::queue::TempQueue;
use thermal::safety::{startup_floor, SafetyEnvelope, SafetyVerdict};

fn test_pid() -> CycleRatioPid {
    // PB 60, Ti 180, Td 45, center 0.5, clamp [0.1, 0.9], 8s hold cycle.
    CycleRatioPid::new(60.0, 180.0, 45.0, 0.5, 0.1, 0.9, 8.0, FanCurve::default())
}

#[test]
fn queue_average_is_mean_of_window() {
    let mut q = TempQueue::new(4, Units::Fahrenheit);
    for t in [100.0, 102.0, 101.0, 103.0] {
        q.enqueue(t);
    }
    assert!(approx_eq!(f64, q.average(), 101.5, epsilon = 0.001));
    // Window slides: 100.0 drops out.
    q.enqueue(98.0);
    assert!(approx_eq!(f64, q.average(), 101.0, epsilon = 0.001));
}

#[test]
fn queue_sheds_single_outlier_but_follows_sustained_change() {
    let mut q = TempQueue::new(4, Units::Fahrenheit);
    for _ in 0..4 {
        q.enqueue(200.0);
    }
    // A lone 20%+ jump is noise and must not move the average.
    q.enqueue(300.0);
    assert!(approx_eq!(f64, q.average(), 200.0, epsilon = 0.001));
    // Three in a row is a real transient: the window restarts on it.
    q.enqueue(300.0);
    q.enqueue(300.0);
    assert!(approx_eq!(f64, q.average(), 300.0, epsilon = 0.001));
}

#[test]
fn queue_marks_open_probe_degraded_and_keeps_last_average() {
    let mut q = TempQueue::new(4, Units::Fahrenheit);
    for t in [160.0, 162.0, 161.0, 163.0] {
        q.enqueue(t);
    }
    let before = q.average();
    for _ in 0..3 {
        q.enqueue(f64::NAN);
    }
    assert!(q.is_degraded());
    assert!(approx_eq!(f64, q.average(), before, epsilon = 0.001));
    // A valid sample clears the flag.
    q.enqueue(162.0);
    assert!(!q.is_degraded());
}

#[test]
fn steinhart_fit_reproduces_calibration_points() {
    // 100k B3950-style thermistor: (temp F, ohms) calibration triple.
    let temps = [77.0, 212.0, 302.0];
    let resistances = [100_000.0, 6_990.0, 2_000.0];
    let (a, b, c) =
        probe::calc_coefficients(temps, resistances, Units::Fahrenheit).expect("fit failed");

    for (t, r) in temps.iter().zip(resistances.iter()) {
        let calc = probe::resistance_to_temp(*r, a, b, c, Units::Fahrenheit).unwrap();
        assert!(
            approx_eq!(f64, calc, *t, epsilon = 0.01),
            "expected {t}F at {r} ohms, got {calc}F"
        );
    }
}

#[test]
fn steinhart_resistance_round_trip() {
    let temps = [77.0, 212.0, 302.0];
    let resistances = [100_000.0, 6_990.0, 2_000.0];
    let (a, b, c) = probe::calc_coefficients(temps, resistances, Units::Fahrenheit).unwrap();

    for r in [80_000.0, 20_000.0, 5_000.0, 2_500.0] {
        let t = probe::resistance_to_temp(r, a, b, c, Units::Fahrenheit).unwrap();
        let back = probe::temp_to_resistance(t, a, b, c, Units::Fahrenheit).unwrap();
        let rel = (back - r).abs() / r;
        assert!(rel < 0.01, "round trip at {r} ohms came back as {back}");
    }
}

#[test]
fn divider_conversion_rejects_open_and_short() {
    let profile = ProbeProfile {
        vs: 3.28,
        rd: 10_000.0,
        a: 7.3431401e-4,
        b: 2.1574370e-4,
        c: 9.5156860e-8,
        name: "test probe".to_string(),
    };
    // Open probe: divider reads the full supply.
    assert!(profile.temperature(3.28, Units::Fahrenheit).is_none());
    // Shorted probe: no voltage across the thermistor.
    assert!(profile.temperature(0.0, Units::Fahrenheit).is_none());
    // A mid-range voltage produces a finite reading.
    let t = profile.temperature(1.5, Units::Fahrenheit).unwrap();
    assert!(t.is_finite());
}

#[test]
fn pid_output_always_clamped() {
    let mut pid = test_pid();
    let t0 = Instant::now();
    pid.set_target(225.0, t0);

    let mut now = t0;
    for i in 0..200 {
        now += Duration::from_secs(8);
        // Swing the input hard in both directions.
        let current = if i % 2 == 0 { 150.0 } else { 320.0 };
        let u = pid.update(current, now);
        assert!((0.1..=0.9).contains(&u), "u = {u} escaped the clamp");
    }
}

#[test]
fn pid_low_clamp_undoes_all_accumulation_on_large_error() {
    let mut pid = test_pid();
    let t0 = Instant::now();
    pid.set_target(225.0, t0);

    // Constant +15 error drives the output onto the low clamp.
    let mut now = t0;
    let mut u = 1.0;
    for _ in 0..40 {
        now += Duration::from_secs(8);
        u = pid.update(240.0, now);
    }
    assert!(approx_eq!(f64, u, 0.1, epsilon = 1e-9));

    // With error > 10 the integral step is fully undone, so the integral
    // term freezes while clamped.
    let (_, i_before, _) = pid.terms();
    now += Duration::from_secs(8);
    pid.update(240.0, now);
    let (_, i_after, _) = pid.terms();
    assert!(approx_eq!(f64, i_after, i_before, epsilon = 1e-9));
}

#[test]
fn pid_low_clamp_keeps_thirty_percent_on_small_error() {
    let mut pid = test_pid();
    let t0 = Instant::now();
    pid.set_target(225.0, t0);

    // Constant +5 error: small enough that the clamp leaves 30% of each
    // integral step in place, letting the output work back off u_min.
    let mut now = t0;
    let mut u = 1.0;
    for _ in 0..200 {
        now += Duration::from_secs(8);
        u = pid.update(230.0, now);
    }
    assert!(approx_eq!(f64, u, 0.1, epsilon = 1e-9));

    let (_, ki, _) = pid.gains_k();
    let expected_step = ki * 0.3 * 5.0 * 8.0;
    let (_, i_before, _) = pid.terms();
    now += Duration::from_secs(8);
    pid.update(230.0, now);
    let (_, i_after, _) = pid.terms();
    assert!(
        approx_eq!(f64, i_after - i_before, expected_step, epsilon = 1e-9),
        "integral drift was {} expected {}",
        i_after - i_before,
        expected_step
    );
}

#[test]
fn pid_converges_without_windup_on_simple_plant() {
    let mut pid = test_pid();
    let t0 = Instant::now();
    pid.set_target(225.0, t0);

    // Crude heater model: heat input proportional to cycle ratio, loss
    // proportional to rise over ambient.
    let mut temp = 180.0;
    let mut now = t0;
    for _ in 0..600 {
        now += Duration::from_secs(8);
        let u = pid.update(temp, now);
        temp += u * 8.0 - (temp - 70.0) * 0.045;
    }
    assert!(
        (temp - 225.0).abs() < 10.0,
        "plant settled at {temp} instead of near 225"
    );
}

#[test]
fn fan_speed_is_rate_limited() {
    let mut pid = test_pid();
    let t0 = Instant::now();
    pid.set_target(225.0, t0);

    // Saturate the recent-ratio window high so the target duty is max_fan.
    let mut now = t0;
    for _ in 0..20 {
        now += Duration::from_secs(8);
        pid.update(150.0, now);
    }

    let mut prev = pid.compute_fan_speed();
    for _ in 0..20 {
        let next = pid.compute_fan_speed();
        assert!(
            (next - prev).abs() <= 5.0 + 1e-9,
            "fan stepped from {prev} to {next}"
        );
        prev = next;
    }
    // And it does eventually arrive at the top of the curve.
    assert!(approx_eq!(f64, prev, 95.0, epsilon = 0.001));
}

#[test]
fn envelope_reignites_then_fails() {
    let envelope = SafetyEnvelope {
        startup_temp: 75.0,
        max_temp: 550.0,
    };
    assert_eq!(
        envelope.check_work(70.0, 2),
        SafetyVerdict::Reignite { retries_left: 1 }
    );
    assert_eq!(envelope.check_work(70.0, 0), SafetyVerdict::StartupFailure);
    assert_eq!(envelope.check_work(225.0, 2), SafetyVerdict::Ok);
}

#[test]
fn envelope_over_temp_trips() {
    let envelope = SafetyEnvelope {
        startup_temp: 75.0,
        max_temp: 500.0,
    };
    assert_eq!(envelope.check_work(505.0, 2), SafetyVerdict::OverTemp);
    assert_eq!(envelope.check_monitor(505.0), SafetyVerdict::OverTemp);
    // Monitor mode never applies the under-temperature check.
    assert_eq!(envelope.check_monitor(60.0), SafetyVerdict::Ok);
}

#[test]
fn startup_floor_clamps_to_settings() {
    // Cold grill at 75F with a 0.4 scale clamps up to the minimum.
    assert!(approx_eq!(
        f64,
        startup_floor(75.0, 0.4, 75.0, 100.0),
        75.0,
        epsilon = 1e-9
    ));
    // Hot restart clamps down to the maximum.
    assert!(approx_eq!(
        f64,
        startup_floor(400.0, 0.9, 75.0, 100.0),
        100.0,
        epsilon = 1e-9
    ));
    assert!(approx_eq!(
        f64,
        startup_floor(220.0, 0.4, 75.0, 100.0),
        88.0,
        epsilon = 1e-9
    ));
}
