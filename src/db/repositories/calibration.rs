use anyhow::{Context, Result};
use rusqlite::{params, OptionalExtension};

use crate::db::{
    helpers::{format_timestamp, parse_datetime},
    models::CalibrationProfile,
    Database,
};

impl Database {
    /// Store the active profile for a device, replacing any previous one.
    /// Only the calibration engine writes here, and only on explicit
    /// (re)calibration.
    pub async fn save_calibration_profile(&self, profile: &CalibrationProfile) -> Result<()> {
        let record = profile.clone();
        self.execute(move |conn| {
            conn.execute(
                "REPLACE INTO calibration
                 (device_id, baseline_voltage, occupied_voltage, occupancy_threshold,
                  movement_variance_threshold, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.device_id,
                    record.baseline_voltage,
                    record.occupied_voltage,
                    record.occupancy_threshold,
                    record.movement_variance_threshold,
                    format_timestamp(record.created_at),
                ],
            )
            .with_context(|| "failed to save calibration profile")?;
            Ok(())
        })
        .await
    }

    pub async fn load_calibration_profile(
        &self,
        device_id: &str,
    ) -> Result<Option<CalibrationProfile>> {
        let device_id = device_id.to_string();
        self.execute(move |conn| {
            conn.query_row(
                "SELECT device_id, baseline_voltage, occupied_voltage, occupancy_threshold,
                        movement_variance_threshold, created_at
                 FROM calibration
                 WHERE device_id = ?1",
                params![device_id],
                |row| {
                    let created_at_str: String = row.get("created_at")?;
                    let created_at = parse_datetime(&created_at_str, "created_at").map_err(|e| {
                        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            e.to_string(),
                        )))
                    })?;
                    Ok(CalibrationProfile {
                        device_id: row.get("device_id")?,
                        baseline_voltage: row.get("baseline_voltage")?,
                        occupied_voltage: row.get("occupied_voltage")?,
                        occupancy_threshold: row.get("occupancy_threshold")?,
                        movement_variance_threshold: row.get("movement_variance_threshold")?,
                        created_at,
                    })
                },
            )
            .optional()
            .with_context(|| "failed to load calibration profile")
        })
        .await
    }
}
