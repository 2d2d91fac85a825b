//! Core module - configuration, errors, and pipeline message types

mod config;
mod error;
mod types;

pub use config::{BatteryConfig, Config, ControlConfig, StorageConfig, TrainerConfig, CONFIG_ENV_VAR};
pub use error::{Error, Result};
pub use types::{CapacityReading, InputMessage, PowerSample, Setpoint};
