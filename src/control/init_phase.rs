//! Warm-up window before the controller starts driving the battery

use chrono::{DateTime, Duration, Utc};

/// Tracks whether a sample falls inside the warm-up window
///
/// The window opens at the first power sample ever seen. Restoring the
/// first sample time from the history store keeps a restart from opening
/// a second window.
#[derive(Debug, Clone)]
pub struct InitPhase {
    duration: Duration,
    first_sample_time: Option<DateTime<Utc>>,
}

impl InitPhase {
    pub fn new(duration: Duration, first_sample_time: Option<DateTime<Utc>>) -> Self {
        Self {
            duration,
            first_sample_time,
        }
    }

    pub fn first_sample_time(&self) -> Option<DateTime<Utc>> {
        self.first_sample_time
    }

    /// When the window closes
    ///
    /// `None` before the first sample, or when the end lies beyond the
    /// representable date range.
    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.first_sample_time
            .and_then(|start| start.checked_add_signed(self.duration))
    }

    /// Record `timestamp` and report whether it is still inside the window
    pub fn is_active(&mut self, timestamp: DateTime<Utc>) -> bool {
        if self.first_sample_time.is_none() {
            log::info!("First sample at {}, warm-up lasts {}", timestamp, self.duration);
            self.first_sample_time = Some(timestamp);
        }

        // An end past the calendar never arrives
        match self.ends_at() {
            Some(end) => timestamp < end,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_opens_at_first_sample() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let mut phase = InitPhase::new(Duration::hours(1), None);

        assert!(phase.is_active(start));
        assert_eq!(phase.first_sample_time(), Some(start));
        assert!(phase.is_active(start + Duration::minutes(59)));
        assert!(!phase.is_active(start + Duration::hours(1)));
        assert_eq!(phase.ends_at(), Some(start + Duration::hours(1)));
    }

    #[test]
    fn test_restored_start_is_kept() {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let mut phase = InitPhase::new(Duration::days(2), Some(start));
        assert!(!phase.is_active(start + Duration::days(3)));
        assert_eq!(phase.first_sample_time(), Some(start));
    }

    #[test]
    fn test_window_ending_past_the_calendar_stays_open() {
        let start = Utc.with_ymd_and_hms(262_000, 1, 1, 0, 0, 0).unwrap();
        let mut phase = InitPhase::new(Duration::days(365 * 1000), None);

        assert!(phase.is_active(start));
        assert!(phase.is_active(start + Duration::days(1)));
        assert_eq!(phase.first_sample_time(), Some(start));
        assert_eq!(phase.ends_at(), None);
    }

    #[test]
    fn test_zero_length_window_is_never_active() {
        let mut phase = InitPhase::new(Duration::zero(), None);
        assert!(!phase.is_active(Utc::now()));
    }
}
