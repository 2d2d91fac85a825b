//! Configuration management

use crate::core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "PEAKSHAVE_CONFIG";

/// Longest accepted warm-up window (100 years)
const MAX_INIT_PHASE_SECS: f64 = 100.0 * 365.0 * 86_400.0;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Ok(PathBuf::from(path));
        }

        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

        let app_config_dir = config_dir.join("peakshave");

        if !app_config_dir.exists() {
            fs::create_dir_all(&app_config_dir)?;
        }

        Ok(app_config_dir.join("config.toml"))
    }

    /// Load configuration from the default location, writing defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_or_init(&Self::config_path()?)
    }

    /// Load `path`, or fall back to defaults only when the file does not exist
    ///
    /// A file that exists but fails to parse or validate is an error.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            let config = Self::default();
            if let Err(e) = config.save_to(path) {
                log::warn!("Could not write default config to {}: {}", path.display(), e);
            }
            return Ok(config);
        }

        Self::load_from(path)
    }

    /// Load and validate configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<()> {
        let battery = &self.battery;
        if !(battery.max_capacity > 0.0) {
            return Err(Error::Config(format!(
                "battery.max_capacity must be positive, got {}",
                battery.max_capacity
            )));
        }
        if !(battery.max_power > 0.0) {
            return Err(Error::Config(format!(
                "battery.max_power must be positive, got {}",
                battery.max_power
            )));
        }
        if let Some(initial) = battery.initial_capacity {
            if !(0.0..=battery.max_capacity).contains(&initial) {
                return Err(Error::Config(format!(
                    "battery.initial_capacity {} is outside [0, {}]",
                    initial, battery.max_capacity
                )));
            }
        }

        match self.control.mode.as_str() {
            "live" | "dry_run" => {}
            other => return Err(Error::Config(format!("Unknown control.mode '{}'", other))),
        }
        self.control.init_phase_duration()?;

        if self.trainer.enabled && self.trainer.url.is_empty() {
            return Err(Error::Config("trainer.url is required when the trainer is enabled".to_string()));
        }

        Ok(())
    }
}

/// Battery limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatteryConfig {
    /// Reservoir ceiling in Wh
    #[serde(default = "default_max_capacity")]
    pub max_capacity: f64,
    /// Largest charge or discharge applied per sample
    #[serde(default = "default_max_power")]
    pub max_power: f64,
    /// Stored energy at startup (defaults to full)
    #[serde(default)]
    pub initial_capacity: Option<f64>,
    /// Keep the battery absent until the first capacity reading arrives
    #[serde(default)]
    pub wait_for_capacity_reading: bool,
}

fn default_max_capacity() -> f64 { 500.0 }
fn default_max_power() -> f64 { 100.0 }

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_max_capacity(),
            max_power: default_max_power(),
            initial_capacity: None,
            wait_for_capacity_reading: false,
        }
    }
}

impl BatteryConfig {
    /// Capacity the battery starts with when not waiting for a reading
    pub fn starting_capacity(&self) -> f64 {
        self.initial_capacity.unwrap_or(self.max_capacity)
    }
}

/// Control loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Mode: "live" drives the battery, "dry_run" only estimates
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Warm-up length, in units of `init_phase_level`
    #[serde(default = "default_init_phase_length")]
    pub init_phase_length: f64,
    /// Warm-up unit: "s", "min", "h" or "d"
    #[serde(default = "default_init_phase_level")]
    pub init_phase_level: String,
    /// Use trained cluster boundaries for peak detection once available
    #[serde(default)]
    pub apply_cluster_boundaries: bool,
}

fn default_mode() -> String { "live".to_string() }
fn default_init_phase_length() -> f64 { 2.0 }
fn default_init_phase_level() -> String { "d".to_string() }

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            init_phase_length: default_init_phase_length(),
            init_phase_level: default_init_phase_level(),
            apply_cluster_boundaries: false,
        }
    }
}

impl ControlConfig {
    /// True when decisions must not reach the battery
    pub fn is_dry_run(&self) -> bool {
        self.mode == "dry_run"
    }

    /// Warm-up window as a duration
    pub fn init_phase_duration(&self) -> Result<chrono::Duration> {
        if !(self.init_phase_length >= 0.0) || !self.init_phase_length.is_finite() {
            return Err(Error::Config(format!(
                "control.init_phase_length must be a non-negative number, got {}",
                self.init_phase_length
            )));
        }

        let unit_secs = match self.init_phase_level.as_str() {
            "s" => 1.0,
            "min" => 60.0,
            "h" => 3600.0,
            "d" => 86_400.0,
            other => {
                return Err(Error::Config(format!("Unknown control.init_phase_level '{}'", other)))
            }
        };

        let secs = self.init_phase_length * unit_secs;
        if secs > MAX_INIT_PHASE_SECS {
            return Err(Error::Config(format!(
                "control.init_phase_length {} {} exceeds 100 years",
                self.init_phase_length, self.init_phase_level
            )));
        }

        chrono::Duration::try_milliseconds((secs * 1000.0).round() as i64).ok_or_else(|| {
            Error::Config(format!(
                "control.init_phase_length {} {} is out of range",
                self.init_phase_length, self.init_phase_level
            ))
        })
    }
}

/// History persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// SQLite file; defaults to the user data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_true() -> bool { true }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

/// Remote training service that fits load clusters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_trainer_url")]
    pub url: String,
    /// Device the load readings belong to
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// History window the job trains on
    #[serde(default = "default_time_range_value")]
    pub time_range_value: String,
    #[serde(default = "default_init_phase_level")]
    pub time_range_level: String,
}

fn default_trainer_url() -> String { "http://ml-trainer-svc.trainer:5000".to_string() }
fn default_poll_interval() -> u64 { 60 }
fn default_time_range_value() -> String { "2".to_string() }

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_trainer_url(),
            device_id: String::new(),
            poll_interval_secs: default_poll_interval(),
            time_range_value: default_time_range_value(),
            time_range_level: default_init_phase_level(),
        }
    }
}
