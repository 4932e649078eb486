//! Classified reading data model.
//!
//! One `ClassifiedReading` is produced per sampling tick and owned by the
//! readings store after creation. `synced` only ever transitions false -> true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sleep::SleepState;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClassifiedReading {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub force_percent: f64,
    pub state: SleepState,
    pub variance: f64,
    pub synced: bool,
}

/// Record handed to the downstream publisher. Field names and layout are the
/// wire contract and stay stable regardless of how readings are stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportPayload {
    pub timestamp: DateTime<Utc>,
    pub sensor_type: String,
    pub channel: u8,
    pub voltage: f64,
    pub force_percent: f64,
    pub state: String,
    pub variance: f64,
    pub device_id: String,
    pub user_id: String,
}

/// Aggregate counters over the readings table.
#[derive(Debug, Clone, Serialize)]
pub struct ReadingStats {
    pub total_readings: i64,
    pub unsynced_readings: i64,
    pub oldest_reading: Option<DateTime<Utc>>,
    pub newest_reading: Option<DateTime<Utc>>,
}
