//! Peak-shaving control loop
//!
//! Each power sample runs through the same sequence: the load tracker
//! observes it, the warm-up window is checked, the tracker decides an
//! intent, the battery applies what it physically can, and the ceiling is
//! ratcheted using the power that was really applied.

mod battery;
mod init_phase;
mod load;

pub use battery::Battery;
pub use init_phase::InitPhase;
pub use load::{Decision, LoadTracker};

use crate::core::{BatteryConfig, CapacityReading, Config, ControlConfig, InputMessage, PowerSample, Result, Setpoint};
use crate::refinement::ThresholdRefinement;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether decisions reach the battery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// Apply decisions to the battery and emit what it delivered
    Live,
    /// Leave the battery untouched and emit the requested power
    DryRun,
}

impl ControlMode {
    pub fn from_config(control: &ControlConfig) -> Self {
        if control.is_dry_run() {
            ControlMode::DryRun
        } else {
            ControlMode::Live
        }
    }
}

/// Everything the controller learns from the stream
///
/// Serializable so it can be snapshotted into the history store and
/// resumed after a restart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerState {
    pub tracker: LoadTracker,
    pub battery: Option<Battery>,
}

impl ControllerState {
    pub fn new(config: &BatteryConfig) -> Self {
        let battery = if config.wait_for_capacity_reading {
            None
        } else {
            Some(Battery::new(config.starting_capacity(), config.max_capacity, config.max_power))
        };

        Self {
            tracker: LoadTracker::new(),
            battery,
        }
    }

    /// Decide, apply and account for one sample the tracker already observed
    ///
    /// Returns the signed battery power. Without a battery there is nothing
    /// to pace against, so the result is zero and the ceiling is left alone.
    pub fn step(&mut self, power: f64, mode: ControlMode) -> f64 {
        let Some(battery) = self.battery.as_mut() else {
            log::debug!("No battery known yet, idling");
            return 0.0;
        };

        let decision = self.tracker.decide(battery, power);
        let applied = match (mode, decision) {
            (_, Decision::Idle) => 0.0,
            (ControlMode::Live, Decision::Charge(requested)) => battery.charge(requested),
            (ControlMode::Live, Decision::Discharge(requested)) => {
                let delivered = battery.discharge(requested);
                if delivered > 0.0 { -delivered } else { 0.0 }
            }
            (ControlMode::DryRun, Decision::Charge(requested)) => requested,
            (ControlMode::DryRun, Decision::Discharge(requested)) => {
                if requested > 0.0 { -requested } else { 0.0 }
            }
        };

        self.tracker.update_corrected_max(applied, power);
        applied
    }

    /// Overwrite stored energy with a sensor reading, creating the battery if needed
    pub fn apply_capacity_reading(&mut self, capacity: f64, config: &BatteryConfig) {
        match self.battery.as_mut() {
            Some(battery) => battery.set_capacity(capacity),
            None => {
                log::info!("First capacity reading {:.1} Wh, battery online", capacity);
                self.battery = Some(Battery::new(capacity, config.max_capacity, config.max_power));
            }
        }
    }
}

/// Per-sample controller wrapping the state with warm-up and mode handling
pub struct Controller {
    state: ControllerState,
    battery_config: BatteryConfig,
    mode: ControlMode,
    init_phase: InitPhase,
    apply_boundaries: bool,
}

impl Controller {
    /// Fresh controller from configuration
    pub fn new(config: &Config) -> Result<Self> {
        Self::restore(config, ControllerState::new(&config.battery), None)
    }

    /// Resume from a saved state and warm-up start
    ///
    /// Battery limits always come from the configuration; only the stored
    /// energy is taken from the snapshot.
    pub fn restore(
        config: &Config,
        mut state: ControllerState,
        first_sample_time: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let duration = config.control.init_phase_duration()?;
        let battery_config = config.battery.clone();

        state.battery = state
            .battery
            .map(|b| Battery::new(b.capacity(), battery_config.max_capacity, battery_config.max_power))
            .or_else(|| ControllerState::new(&battery_config).battery);

        match &state.battery {
            Some(battery) => log::info!(
                "Battery at {:.1} of {:.1} Wh, {:.1} W per sample",
                battery.capacity(),
                battery.max_capacity(),
                battery.max_power()
            ),
            None => log::info!("Waiting for the first capacity reading"),
        }

        let init_phase = InitPhase::new(duration, first_sample_time);
        if let Some(end) = init_phase.ends_at() {
            log::info!("Warm-up window ends at {}", end);
        }

        Ok(Self {
            state,
            battery_config,
            mode: ControlMode::from_config(&config.control),
            init_phase,
            apply_boundaries: config.control.apply_cluster_boundaries,
        })
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn first_sample_time(&self) -> Option<DateTime<Utc>> {
        self.init_phase.first_sample_time()
    }

    /// Dispatch one input message; only power samples produce a setpoint
    pub fn handle(&mut self, message: &InputMessage) -> Option<Setpoint> {
        match message {
            InputMessage::Power(sample) => Some(self.process_power(sample)),
            InputMessage::Capacity(reading) => {
                self.process_capacity(reading);
                None
            }
        }
    }

    /// Run the full control sequence for one power sample
    pub fn process_power(&mut self, sample: &PowerSample) -> Setpoint {
        log::debug!("Power: {:.1} at {}", sample.power, sample.timestamp);

        self.state.tracker.observe(sample.power);

        if self.init_phase.is_active(sample.timestamp) {
            return Setpoint::warming_up(sample.timestamp);
        }

        let battery_power = self.state.step(sample.power, self.mode);
        log::debug!(
            "Battery power: {:.1}, ceiling {:.1}",
            battery_power,
            self.state.tracker.corrected_max()
        );

        Setpoint {
            battery_power,
            ..Setpoint::idle(sample.timestamp)
        }
    }

    /// Apply an out-of-band stored-energy reading
    pub fn process_capacity(&mut self, reading: &CapacityReading) {
        log::debug!("Capacity: {:.1} at {}", reading.capacity, reading.capacity_time);
        self.state.apply_capacity_reading(reading.capacity, &self.battery_config);
    }

    /// Offer a peak threshold from a trained model
    ///
    /// The threshold is always logged; it only changes peak detection when
    /// enabled in the configuration.
    pub fn apply_refinement(&mut self, refinement: &dyn ThresholdRefinement) {
        let threshold = refinement.peak_threshold();
        match threshold {
            Some(level) => log::info!("Trained peak threshold available: {:.1}", level),
            None => log::warn!("Trained model did not yield a usable peak threshold"),
        }

        if self.apply_boundaries && threshold.is_some() {
            self.state.tracker.set_peak_threshold_override(threshold);
        }
    }
}
