//! Bounded energy reservoir
//!
//! Requests are clamped rather than rejected: the power returned from
//! `charge`/`discharge` is what was actually applied after the rate limit
//! and the `[0, max_capacity]` bounds were enforced.

use serde::{Deserialize, Serialize};

/// Battery bookkeeping in Wh, one call per sampling interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    capacity: f64,
    max_capacity: f64,
    max_power: f64,
}

impl Battery {
    /// Create a battery; the starting capacity is clamped into range
    pub fn new(capacity: f64, max_capacity: f64, max_power: f64) -> Self {
        Self {
            capacity: capacity.clamp(0.0, max_capacity),
            max_capacity,
            max_power,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn max_capacity(&self) -> f64 {
        self.max_capacity
    }

    pub fn max_power(&self) -> f64 {
        self.max_power
    }

    /// Overwrite stored energy with a sensor reading
    pub fn set_capacity(&mut self, capacity: f64) {
        let clamped = capacity.clamp(0.0, self.max_capacity);
        if clamped != capacity {
            log::warn!(
                "Capacity reading {} outside [0, {}], clamped to {}",
                capacity, self.max_capacity, clamped
            );
        }
        self.capacity = clamped;
    }

    /// Store up to `requested` and return the power actually absorbed
    pub fn charge(&mut self, requested: f64) -> f64 {
        let power = requested.clamp(0.0, self.max_power);
        let headroom = (self.max_capacity - self.capacity).max(0.0);

        // Never hand back more than was asked for, even when rounding puts
        // the remaining headroom a hair above the request
        if power >= headroom {
            self.capacity = self.max_capacity;
            headroom
        } else {
            self.capacity = (self.capacity + power).min(self.max_capacity);
            power
        }
    }

    /// Release up to `requested` and return the power actually delivered
    pub fn discharge(&mut self, requested: f64) -> f64 {
        let power = requested.clamp(0.0, self.max_power);

        if power >= self.capacity {
            let applied = self.capacity;
            self.capacity = 0.0;
            applied
        } else {
            self.capacity = (self.capacity - power).max(0.0);
            power
        }
    }
}
