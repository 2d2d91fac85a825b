//! Database module for persisting controller history across restarts
//!
//! Uses SQLite for local storage of:
//! - Every processed power sample and the setpoint emitted for it
//! - Key/value metadata (warm-up start, training job id)
//! - A JSON snapshot of the controller state

use crate::control::ControllerState;
use crate::core::{Error, Result, Setpoint};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const META_FIRST_SAMPLE_TIME: &str = "first_sample_time";
const META_TRAINING_JOB_ID: &str = "training_job_id";
const META_TRAINING_STARTED: &str = "training_started";
const META_CONTROLLER_STATE: &str = "controller_state";

/// History store
pub struct HistoryStore {
    conn: Connection,
}

/// Stored sample with its setpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub id: i64,
    pub timestamp: i64,
    pub power: f64,
    pub battery_power: f64,
    pub initial_phase: bool,
}

impl HistoryStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;

        let store = Self { conn };
        store.init_schema()?;

        Ok(store)
    }

    /// Volatile store, for dry runs and tests
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Default database file path
    pub fn default_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| Error::Database(rusqlite::Error::InvalidPath(PathBuf::new())))?;

        Ok(data_dir.join("peakshave").join("history.db"))
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Processed samples and emitted setpoints
            CREATE TABLE IF NOT EXISTS samples (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                power REAL NOT NULL,
                battery_power REAL NOT NULL,
                initial_phase INTEGER NOT NULL DEFAULT 0
            );

            -- Controller metadata
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_samples_timestamp ON samples(timestamp);
            "#,
        )?;

        Ok(())
    }

    /// Record a processed sample
    pub fn insert_sample(&self, power: f64, setpoint: &Setpoint) -> Result<()> {
        self.conn.execute(
            "INSERT INTO samples (timestamp, power, battery_power, initial_phase) VALUES (?1, ?2, ?3, ?4)",
            params![
                setpoint.timestamp.timestamp_millis(),
                power,
                setpoint.battery_power,
                setpoint.initial_phase
            ],
        )?;

        Ok(())
    }

    /// Samples in `[start, end]` (epoch milliseconds), oldest first
    pub fn get_samples(&self, start: i64, end: i64) -> Result<Vec<SampleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, timestamp, power, battery_power, initial_phase
             FROM samples
             WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp ASC, id ASC",
        )?;

        let samples = stmt
            .query_map(params![start, end], |row| {
                Ok(SampleRecord {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    power: row.get(2)?,
                    battery_power: row.get(3)?,
                    initial_phase: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(samples)
    }

    pub fn sample_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM samples", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    pub fn save_first_sample_time(&self, time: DateTime<Utc>) -> Result<()> {
        self.set_meta(META_FIRST_SAMPLE_TIME, &time.to_rfc3339())
    }

    pub fn first_sample_time(&self) -> Result<Option<DateTime<Utc>>> {
        match self.get_meta(META_FIRST_SAMPLE_TIME)? {
            Some(raw) => {
                let time = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| Error::Serialization(format!("Bad first sample time '{}': {}", raw, e)))?;
                Ok(Some(time.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    pub fn save_training_job_id(&self, job_id: &str) -> Result<()> {
        self.set_meta(META_TRAINING_JOB_ID, job_id)
    }

    pub fn training_job_id(&self) -> Result<Option<String>> {
        self.get_meta(META_TRAINING_JOB_ID)
    }

    pub fn mark_training_started(&self) -> Result<()> {
        self.set_meta(META_TRAINING_STARTED, "true")
    }

    pub fn training_started(&self) -> Result<bool> {
        Ok(self.get_meta(META_TRAINING_STARTED)?.as_deref() == Some("true"))
    }

    /// Snapshot the controller state
    pub fn save_state(&self, state: &ControllerState) -> Result<()> {
        let json = serde_json::to_string(state)?;
        self.set_meta(META_CONTROLLER_STATE, &json)
    }

    /// Last saved controller state, if any
    pub fn load_state(&self) -> Result<Option<ControllerState>> {
        match self.get_meta(META_CONTROLLER_STATE)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{Battery, LoadTracker};
    use chrono::TimeZone;

    #[test]
    fn test_insert_and_get_samples() {
        let store = HistoryStore::open_in_memory().unwrap();
        // 2024-01-15 12:00:00 UTC
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();

        for i in 0..4 {
            let setpoint = Setpoint {
                battery_power: -10.0 * i as f64,
                timestamp: base + chrono::Duration::minutes(i),
                initial_phase: i == 0,
            };
            store.insert_sample(100.0 + i as f64, &setpoint).unwrap();
        }

        assert_eq!(store.sample_count().unwrap(), 4);

        let all = store.get_samples(0, i64::MAX).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all[0].initial_phase);
        assert!(!all[1].initial_phase);
        assert!((all[3].battery_power + 30.0).abs() < 0.001);

        let start = (base + chrono::Duration::minutes(1)).timestamp_millis();
        let end = (base + chrono::Duration::minutes(2)).timestamp_millis();
        let window = store.get_samples(start, end).unwrap();
        assert_eq!(window.len(), 2);
        assert!((window[0].power - 101.0).abs() < 0.001);
    }

    #[test]
    fn test_meta_upsert() {
        let store = HistoryStore::open_in_memory().unwrap();
        assert_eq!(store.get_meta("missing").unwrap(), None);

        store.set_meta("k", "one").unwrap();
        store.set_meta("k", "two").unwrap();
        assert_eq!(store.get_meta("k").unwrap(), Some("two".to_string()));
    }

    #[test]
    fn test_training_metadata() {
        let store = HistoryStore::open_in_memory().unwrap();
        assert!(!store.training_started().unwrap());
        assert_eq!(store.training_job_id().unwrap(), None);

        store.mark_training_started().unwrap();
        store.save_training_job_id("job-42").unwrap();
        assert!(store.training_started().unwrap());
        assert_eq!(store.training_job_id().unwrap(), Some("job-42".to_string()));
    }

    #[test]
    fn test_first_sample_time_round_trip() {
        let store = HistoryStore::open_in_memory().unwrap();
        assert_eq!(store.first_sample_time().unwrap(), None);

        let time = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap();
        store.save_first_sample_time(time).unwrap();
        assert_eq!(store.first_sample_time().unwrap(), Some(time));
    }

    #[test]
    fn test_state_snapshot() {
        let store = HistoryStore::open_in_memory().unwrap();
        assert!(store.load_state().unwrap().is_none());

        let mut tracker = LoadTracker::new();
        for p in [100.0, 90.0, 10.0] {
            tracker.observe(p);
        }
        let state = ControllerState {
            tracker,
            battery: Some(Battery::new(42.0, 100.0, 20.0)),
        };
        store.save_state(&state).unwrap();

        let loaded = store.load_state().unwrap().unwrap();
        assert_eq!(loaded.tracker.episode_durations(), &[2]);
        assert_eq!(loaded.battery.unwrap().capacity(), 42.0);
    }
}
