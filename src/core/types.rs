//! Message types exchanged with the telemetry pipeline

use crate::core::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single power-consumption reading of the external load
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerSample {
    /// Load power draw in watts
    pub power: f64,
    /// Time the reading was taken
    pub timestamp: DateTime<Utc>,
}

impl PowerSample {
    pub fn new(power: f64, timestamp: DateTime<Utc>) -> Self {
        Self { power, timestamp }
    }
}

/// Out-of-band stored-energy reading from the battery's own sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapacityReading {
    /// Stored energy in Wh
    pub capacity: f64,
    pub capacity_time: DateTime<Utc>,
}

/// Any message arriving on the input stream
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputMessage {
    Power(PowerSample),
    Capacity(CapacityReading),
}

impl InputMessage {
    /// Decode one JSON line from the pipeline
    pub fn parse(line: &str) -> Result<Self> {
        let message: InputMessage = serde_json::from_str(line.trim())?;

        let value = match &message {
            InputMessage::Power(sample) => sample.power,
            InputMessage::Capacity(reading) => reading.capacity,
        };
        if !value.is_finite() {
            return Err(Error::InvalidInput(format!("non-finite value in message: {}", line.trim())));
        }

        Ok(message)
    }
}

/// Battery setpoint emitted for one power sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Setpoint {
    /// Signed battery power: negative discharges, positive charges, zero idles
    pub battery_power: f64,
    /// Timestamp of the power sample this answers
    pub timestamp: DateTime<Utc>,
    /// Whether the controller was still warming up
    #[serde(default)]
    pub initial_phase: bool,
}

impl Setpoint {
    pub fn idle(timestamp: DateTime<Utc>) -> Self {
        Self {
            battery_power: 0.0,
            timestamp,
            initial_phase: false,
        }
    }

    pub fn warming_up(timestamp: DateTime<Utc>) -> Self {
        Self {
            battery_power: 0.0,
            timestamp,
            initial_phase: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_power_message() {
        let msg = InputMessage::parse(r#"{"power": 1250.5, "timestamp": "2024-01-15T12:00:00Z"}"#).unwrap();
        match msg {
            InputMessage::Power(sample) => {
                assert_eq!(sample.power, 1250.5);
                assert_eq!(sample.timestamp.timestamp(), 1705320000);
            }
            other => panic!("expected power message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_capacity_message() {
        let msg = InputMessage::parse(r#"{"capacity": 320.0, "capacity_time": "2024-01-15T12:00:00Z"}"#).unwrap();
        assert!(matches!(msg, InputMessage::Capacity(r) if r.capacity == 320.0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(InputMessage::parse("not json").is_err());
        assert!(InputMessage::parse(r#"{"voltage": 230}"#).is_err());
    }

    #[test]
    fn test_setpoint_serializes_signed_power() {
        let ts = DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z").unwrap().with_timezone(&Utc);
        let setpoint = Setpoint { battery_power: -20.0, timestamp: ts, initial_phase: false };
        let json = serde_json::to_value(setpoint).unwrap();
        assert_eq!(json["battery_power"], -20.0);
        assert_eq!(json["initial_phase"], false);
    }
}
