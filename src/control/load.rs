//! Running statistics of the load and the charge/discharge decision
//!
//! The tracker watches the power stream, keeps the running maximum and the
//! segment thresholds derived from it, measures how long the load stays in
//! its top segment ("peak episodes"), and turns each sample into a battery
//! intent relative to the best ceiling reached so far (`corrected_max`).

use crate::control::Battery;
use serde::{Deserialize, Serialize};

/// Quantile of completed peak-episode lengths used to pace discharge
const EPISODE_QUANTILE: f64 = 0.9;

/// What the battery should do for the current sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    /// Absorb up to this much power
    Charge(f64),
    /// Deliver up to this much power
    Discharge(f64),
    Idle,
}

/// Load statistics and excursion state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadTracker {
    running_max: f64,
    corrected_max: f64,
    quarter_seg: f64,
    half_seg: f64,
    three_quarter_seg: f64,
    /// Externally refined peak threshold, replaces `three_quarter_seg` when set
    #[serde(default)]
    peak_threshold_override: Option<f64>,
    in_peak_episode: bool,
    current_episode_samples: Vec<f64>,
    episode_durations: Vec<usize>,
    p90_episode_duration: Option<f64>,
    discharge_power_for_current_excursion: Option<f64>,
    in_above_ceiling_excursion: bool,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running_max(&self) -> f64 {
        self.running_max
    }

    pub fn corrected_max(&self) -> f64 {
        self.corrected_max
    }

    /// Segment thresholds at 1/4, 1/2 and 3/4 of the running maximum
    pub fn segments(&self) -> (f64, f64, f64) {
        (self.quarter_seg, self.half_seg, self.three_quarter_seg)
    }

    /// Level at or above which a sample counts as part of a peak episode
    pub fn peak_threshold(&self) -> f64 {
        self.peak_threshold_override.unwrap_or(self.three_quarter_seg)
    }

    pub fn in_peak_episode(&self) -> bool {
        self.in_peak_episode
    }

    pub fn episode_durations(&self) -> &[usize] {
        &self.episode_durations
    }

    /// 0.9-quantile of completed episode lengths, `None` before the first one closes
    pub fn p90_episode_duration(&self) -> Option<f64> {
        self.p90_episode_duration
    }

    pub fn in_excursion(&self) -> bool {
        self.in_above_ceiling_excursion
    }

    pub fn excursion_discharge_power(&self) -> Option<f64> {
        self.discharge_power_for_current_excursion
    }

    /// Replace (or clear) the peak-detection threshold
    pub fn set_peak_threshold_override(&mut self, threshold: Option<f64>) {
        self.peak_threshold_override = threshold;
    }

    /// Fold a new sample into the running statistics
    ///
    /// The maximum and segments are refreshed before the episode state
    /// machine runs, so the sample is classified against thresholds that
    /// already include it.
    pub fn observe(&mut self, new_point: f64) {
        if self.update_max(new_point) {
            self.update_segments();
        }
        self.track_peak_episode(new_point);
    }

    fn update_max(&mut self, new_point: f64) -> bool {
        if new_point > self.running_max {
            self.running_max = new_point;
            true
        } else {
            false
        }
    }

    fn update_segments(&mut self) {
        self.quarter_seg = self.running_max / 4.0;
        self.half_seg = self.running_max / 2.0;
        self.three_quarter_seg = 3.0 * self.running_max / 4.0;
    }

    fn track_peak_episode(&mut self, new_point: f64) {
        let above = new_point >= self.peak_threshold();

        match (self.in_peak_episode, above) {
            (false, true) => {
                self.in_peak_episode = true;
                self.current_episode_samples.clear();
                self.current_episode_samples.push(new_point);
                log::debug!("Peak episode started at {:.1}", new_point);
            }
            (true, true) => self.current_episode_samples.push(new_point),
            (true, false) => {
                self.in_peak_episode = false;
                let duration = self.current_episode_samples.len();
                self.current_episode_samples.clear();
                self.episode_durations.push(duration);
                self.p90_episode_duration = quantile(&self.episode_durations, EPISODE_QUANTILE);
                log::debug!(
                    "Peak episode ended after {} samples, p90 duration now {:?}",
                    duration, self.p90_episode_duration
                );
            }
            (false, false) => {}
        }
    }

    /// Decide the battery intent for `new_point`
    ///
    /// Discharge is checked first because it may also close an excursion;
    /// the two guards are complementary around `corrected_max`, so at most
    /// one of them can request power.
    pub fn decide(&mut self, battery: &Battery, new_point: f64) -> Decision {
        if let Some(power) = self.discharge_check(battery, new_point) {
            return Decision::Discharge(power);
        }
        match self.charge_check(new_point) {
            Some(power) => Decision::Charge(power),
            None => Decision::Idle,
        }
    }

    fn charge_check(&self, new_point: f64) -> Option<f64> {
        if new_point > self.corrected_max {
            return None;
        }

        let target = if self.corrected_max <= self.quarter_seg {
            self.quarter_seg
        } else {
            self.corrected_max
        };
        Some((target - new_point).max(0.0))
    }

    /// Energy per sample that lasts through a typical peak episode
    fn discharge_budget(&self, battery: &Battery) -> f64 {
        battery.capacity() / (self.p90_episode_duration.unwrap_or(0.0) + 1.0)
    }

    fn discharge_check(&mut self, battery: &Battery, new_point: f64) -> Option<f64> {
        let above_ceiling = new_point > self.corrected_max;

        match (self.in_above_ceiling_excursion, above_ceiling) {
            (false, true) => {
                let excess = new_point - self.corrected_max;
                let budget = self.discharge_budget(battery);
                if excess <= budget {
                    return Some(excess);
                }

                self.discharge_power_for_current_excursion = Some(budget);
                self.in_above_ceiling_excursion = true;
                log::debug!(
                    "Excursion above {:.1} started, discharge locked at {:.1}",
                    self.corrected_max, budget
                );
                Some(budget.round_ties_even().min(new_point))
            }
            (true, true) => {
                let locked = self.discharge_power_for_current_excursion.unwrap_or(0.0);
                Some(locked.round_ties_even().min(new_point))
            }
            (true, false) => {
                self.discharge_power_for_current_excursion = None;
                self.in_above_ceiling_excursion = false;
                log::debug!("Excursion ended at {:.1}", new_point);
                None
            }
            (false, false) => None,
        }
    }

    /// Ratchet the ceiling up to the net value the battery actually achieved
    pub fn update_corrected_max(&mut self, battery_power: f64, new_point: f64) {
        let net = new_point + battery_power;
        if net > self.corrected_max {
            self.corrected_max = net;
        }
    }
}

/// Linearly interpolated quantile of `values`, `None` when empty
fn quantile(values: &[usize], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_unstable();

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    let low = sorted[lower] as f64;
    let high = sorted[upper] as f64;
    Some(low + (high - low) * fraction)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tracker: &mut LoadTracker, points: &[f64]) {
        for &p in points {
            tracker.observe(p);
        }
    }

    #[test]
    fn test_quantile_matches_linear_interpolation() {
        assert_eq!(quantile(&[], 0.9), None);
        assert_eq!(quantile(&[7], 0.9), Some(7.0));
        // position = 0.9 * 9 = 8.1 -> 9 + 0.1 * (10 - 9)
        let values: Vec<usize> = (1..=10).collect();
        let q = quantile(&values, 0.9).unwrap();
        assert!((q - 9.1).abs() < 1e-9);
        // unsorted input
        let q = quantile(&[5, 1, 3], 0.9).unwrap();
        assert!((q - 4.6).abs() < 1e-9);
    }

    #[test]
    fn test_segments_follow_running_max() {
        let mut tracker = LoadTracker::new();
        feed(&mut tracker, &[40.0, 80.0, 20.0]);
        assert_eq!(tracker.running_max(), 80.0);
        assert_eq!(tracker.segments(), (20.0, 40.0, 60.0));
    }

    #[test]
    fn test_rising_sequence_episode() {
        let mut tracker = LoadTracker::new();
        // 40 opens an episode against its own threshold (30); 80, 90 and 95
        // each raise the max but stay above 3/4 of it; 60 < 71.25 closes it.
        feed(&mut tracker, &[40.0, 80.0, 90.0, 95.0]);
        assert!(tracker.in_peak_episode());
        assert!(tracker.episode_durations().is_empty());
        assert_eq!(tracker.p90_episode_duration(), None);

        tracker.observe(60.0);
        assert!(!tracker.in_peak_episode());
        assert_eq!(tracker.segments().2, 71.25);
        assert_eq!(tracker.episode_durations(), &[4]);
        assert_eq!(tracker.p90_episode_duration(), Some(4.0));
    }

    #[test]
    fn test_single_dip_splits_episodes() {
        let mut tracker = LoadTracker::new();
        feed(&mut tracker, &[100.0, 10.0]);
        assert_eq!(tracker.episode_durations(), &[1]);

        feed(&mut tracker, &[90.0, 95.0, 80.0, 50.0, 85.0, 10.0]);
        assert_eq!(tracker.episode_durations(), &[1, 3, 1]);
    }

    #[test]
    fn test_threshold_override_changes_classification() {
        let mut tracker = LoadTracker::new();
        tracker.observe(100.0);
        tracker.observe(10.0);
        tracker.set_peak_threshold_override(Some(50.0));
        feed(&mut tracker, &[60.0, 55.0, 40.0]);
        assert_eq!(tracker.episode_durations(), &[1, 2]);

        tracker.set_peak_threshold_override(None);
        assert_eq!(tracker.peak_threshold(), 75.0);
    }

    #[test]
    fn test_maxima_never_decrease() {
        let mut tracker = LoadTracker::new();
        let mut battery = Battery::new(200.0, 400.0, 50.0);
        let mut last_max = 0.0;
        let mut last_corrected = 0.0;

        for i in 0..500 {
            let point = 100.0 + 80.0 * ((i as f64) * 0.37).sin() + (i % 7) as f64 * 3.0;
            tracker.observe(point);
            let applied = match tracker.decide(&battery, point) {
                Decision::Charge(p) => battery.charge(p),
                Decision::Discharge(p) => -battery.discharge(p),
                Decision::Idle => 0.0,
            };
            tracker.update_corrected_max(applied, point);

            assert!(tracker.running_max() >= last_max);
            assert!(tracker.corrected_max() >= last_corrected);
            last_max = tracker.running_max();
            last_corrected = tracker.corrected_max();
        }
    }

    #[test]
    fn test_charge_targets_quarter_segment_while_ceiling_is_low() {
        let mut tracker = LoadTracker::new();
        tracker.observe(100.0);
        tracker.update_corrected_max(0.0, 20.0);
        // corrected_max 20 <= quarter 25: fill up toward 25
        assert_eq!(tracker.charge_check(10.0), Some(15.0));
        assert_eq!(tracker.charge_check(30.0), None);
    }

    #[test]
    fn test_charge_targets_corrected_max() {
        let mut tracker = LoadTracker::new();
        tracker.observe(100.0);
        tracker.update_corrected_max(-10.0, 70.0);
        assert_eq!(tracker.corrected_max(), 60.0);
        assert_eq!(tracker.charge_check(45.0), Some(15.0));
        assert_eq!(tracker.charge_check(60.0), Some(0.0));
    }

    #[test]
    fn test_short_excursion_requests_exact_excess() {
        let mut tracker = LoadTracker::new();
        let battery = Battery::new(100.0, 100.0, 50.0);
        tracker.observe(50.0);
        tracker.update_corrected_max(0.0, 50.0);

        assert_eq!(tracker.decide(&battery, 58.0), Decision::Discharge(8.0));
        assert!(!tracker.in_excursion());
    }

    #[test]
    fn test_excursion_locks_budgeted_rate() {
        let mut tracker = LoadTracker::new();
        tracker.episode_durations = vec![9];
        tracker.p90_episode_duration = quantile(&tracker.episode_durations, EPISODE_QUANTILE);
        assert_eq!(tracker.p90_episode_duration(), Some(9.0));
        tracker.update_corrected_max(0.0, 50.0);

        let battery = Battery::new(100.0, 100.0, 50.0);
        // excess 11 > 100 / (9 + 1)
        assert_eq!(tracker.decide(&battery, 61.0), Decision::Discharge(10.0));
        assert!(tracker.in_excursion());
        assert_eq!(tracker.excursion_discharge_power(), Some(10.0));

        // rate stays locked even when the excess shrinks
        assert_eq!(tracker.decide(&battery, 52.0), Decision::Discharge(10.0));

        // back under the ceiling: excursion closes, charge path takes over
        assert_eq!(tracker.decide(&battery, 45.0), Decision::Charge(5.0));
        assert!(!tracker.in_excursion());
        assert_eq!(tracker.excursion_discharge_power(), None);
    }

    #[test]
    fn test_locked_rate_is_rounded_and_capped_by_load() {
        let mut tracker = LoadTracker::new();
        tracker.p90_episode_duration = Some(2.0);
        // corrected_max stays 0, budget 100 / 3 = 33.33
        let battery = Battery::new(100.0, 100.0, 50.0);
        assert_eq!(tracker.decide(&battery, 40.0), Decision::Discharge(33.0));
        assert_eq!(tracker.decide(&battery, 12.0), Decision::Discharge(12.0));
    }

    #[test]
    fn test_no_episode_yet_budgets_whole_capacity() {
        let mut tracker = LoadTracker::new();
        let battery = Battery::new(30.0, 100.0, 50.0);
        assert_eq!(tracker.decide(&battery, 25.0), Decision::Discharge(25.0));
        assert!(!tracker.in_excursion());
        assert_eq!(tracker.decide(&battery, 45.0), Decision::Discharge(30.0));
        assert!(tracker.in_excursion());
    }

    #[test]
    fn test_snapshot_round_trip_preserves_state() {
        let mut tracker = LoadTracker::new();
        feed(&mut tracker, &[100.0, 90.0, 10.0, 95.0]);
        let json = serde_json::to_string(&tracker).unwrap();
        let restored: LoadTracker = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.episode_durations(), &[2]);
        assert!(restored.in_peak_episode());
        assert_eq!(restored.running_max(), 100.0);
    }
}
