//! Calibration profile data model.
//!
//! Exactly one active profile exists per device; it is created by the
//! calibration engine and immutable until explicit recalibration overwrites it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationProfile {
    pub device_id: String,
    /// Voltage with no occupant on the sensor.
    pub baseline_voltage: f64,
    /// Voltage with the occupant in normal sleeping position.
    pub occupied_voltage: f64,
    /// Voltage midpoint above which the bed counts as occupied. Lies strictly
    /// between baseline and occupied.
    pub occupancy_threshold: f64,
    /// Window-variance noise floor below which the occupant counts as still.
    pub movement_variance_threshold: f64,
    pub created_at: DateTime<Utc>,
}

impl CalibrationProfile {
    /// Calibrated voltage range between empty and occupied.
    pub fn span(&self) -> f64 {
        self.occupied_voltage - self.baseline_voltage
    }

    /// The occupancy threshold expressed on the force-percentage scale the
    /// state machine operates on.
    pub fn occupancy_threshold_percent(&self) -> f64 {
        ((self.occupancy_threshold - self.baseline_voltage) / self.span() * 100.0)
            .clamp(0.0, 100.0)
    }
}
