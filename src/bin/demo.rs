//! peakshave - Demo CLI
//!
//! Replays a synthetic household load profile through the controller and
//! shows how far the battery flattens the daily peaks.

use chrono::{Duration, TimeZone, Utc};
use peakshave_lib::control::Controller;
use peakshave_lib::core::{Config, PowerSample};

/// Samples per simulated day (15 minute resolution)
const SAMPLES_PER_DAY: usize = 96;
const DAYS: usize = 5;

/// Load in watts: base load, a morning bump and a long evening peak
fn synthetic_load(index: usize) -> f64 {
    let slot = index % SAMPLES_PER_DAY;
    let day = index / SAMPLES_PER_DAY;
    let hour = slot as f64 / 4.0;

    let base = 180.0 + 25.0 * ((index as f64) * 0.7).sin();
    let morning = if (6.5..8.5).contains(&hour) { 450.0 } else { 0.0 };
    let evening = if (17.0..21.0).contains(&hour) {
        900.0 + 60.0 * day as f64 + 80.0 * ((hour - 17.0) * 1.5).sin()
    } else {
        0.0
    };

    base + morning + evening
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("==============================================");
    println!("   peakshave - Demo CLI");
    println!("==============================================\n");

    let mut config = Config::default();
    config.battery.max_capacity = 1500.0;
    config.battery.max_power = 400.0;
    config.control.init_phase_length = 1.0;
    config.control.init_phase_level = "d".to_string();

    println!("  Battery:   {:.0} Wh, {:.0} W per sample", config.battery.max_capacity, config.battery.max_power);
    println!("  Warm-up:   {} {}", config.control.init_phase_length, config.control.init_phase_level);
    println!("  Profile:   {} days x {} samples\n", DAYS, SAMPLES_PER_DAY);

    let mut controller = match Controller::new(&config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Invalid demo configuration: {}", e);
            std::process::exit(1);
        }
    };

    let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();

    println!("----------------------------------------------------------");
    println!("  Day |  Raw peak |  Net peak |  Discharged |  Capacity");
    println!("      |    (W)    |    (W)    |     (Wh)    |    (Wh)");
    println!("----------------------------------------------------------");

    for day in 0..DAYS {
        let mut raw_peak = 0.0f64;
        let mut net_peak = 0.0f64;
        let mut discharged = 0.0;
        let mut warming_up = false;

        for slot in 0..SAMPLES_PER_DAY {
            let index = day * SAMPLES_PER_DAY + slot;
            let sample = PowerSample::new(
                synthetic_load(index),
                start + Duration::minutes(15 * index as i64),
            );

            let setpoint = controller.process_power(&sample);
            warming_up |= setpoint.initial_phase;

            raw_peak = raw_peak.max(sample.power);
            net_peak = net_peak.max(sample.power + setpoint.battery_power);
            if setpoint.battery_power < 0.0 {
                discharged -= setpoint.battery_power;
            }
        }

        let capacity = controller
            .state()
            .battery
            .as_ref()
            .map(|b| b.capacity())
            .unwrap_or(0.0);

        println!(
            "  {:>3} | {:>9.1} | {:>9.1} | {:>11.1} | {:>9.1}{}",
            day + 1,
            raw_peak,
            net_peak,
            discharged,
            capacity,
            if warming_up { "  (warm-up)" } else { "" }
        );
    }

    println!("----------------------------------------------------------\n");

    let tracker = &controller.state().tracker;
    println!("=== Tracker Summary ===\n");
    println!("  Running max:        {:.1} W", tracker.running_max());
    println!("  Corrected max:      {:.1} W", tracker.corrected_max());
    let (quarter, half, three_quarter) = tracker.segments();
    println!("  Segments:           {:.1} / {:.1} / {:.1} W", quarter, half, three_quarter);
    println!("  Peak episodes:      {}", tracker.episode_durations().len());
    match tracker.p90_episode_duration() {
        Some(p90) => println!("  p90 episode length: {:.1} samples", p90),
        None => println!("  p90 episode length: n/a"),
    }
    println!();
}
