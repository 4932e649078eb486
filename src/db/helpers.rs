use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::sleep::SleepState;

/// Timestamps are stored as fixed-width RFC 3339 text so the `timestamp`
/// index orders and range-compares correctly as strings.
pub fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, false)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_state(value: &str) -> Result<SleepState> {
    match value {
        "Empty" => Ok(SleepState::Empty),
        "Awake" => Ok(SleepState::Awake),
        "Moving" => Ok(SleepState::Moving),
        "Asleep" => Ok(SleepState::Asleep),
        other => Err(anyhow!("unknown sleep state {other}")),
    }
}
