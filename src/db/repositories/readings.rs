use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Row};

use crate::db::{
    helpers::{format_timestamp, parse_datetime, parse_state},
    models::{ClassifiedReading, ReadingStats},
    Database,
};

fn row_to_reading(row: &Row) -> Result<ClassifiedReading, rusqlite::Error> {
    let timestamp_str: String = row.get("timestamp")?;
    let state_str: String = row.get("state")?;

    let invalid = |e: anyhow::Error| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            e.to_string(),
        )))
    };

    Ok(ClassifiedReading {
        id: row.get("id")?,
        timestamp: parse_datetime(&timestamp_str, "timestamp").map_err(invalid)?,
        voltage: row.get("voltage")?,
        force_percent: row.get("force_percent")?,
        state: parse_state(&state_str).map_err(invalid)?,
        variance: row.get("variance")?,
        synced: row.get("synced")?,
    })
}

impl Database {
    /// Durable append of one reading. Returns the assigned row id.
    pub async fn insert_reading(
        &self,
        reading: &ClassifiedReading,
        device_id: &str,
        user_id: &str,
    ) -> Result<i64> {
        let record = reading.clone();
        let device_id = device_id.to_string();
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO readings
                 (timestamp, voltage, force_percent, state, variance, synced, device_id, user_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    format_timestamp(record.timestamp),
                    record.voltage,
                    record.force_percent,
                    record.state.as_str(),
                    record.variance,
                    record.synced,
                    device_id,
                    user_id,
                ],
            )
            .with_context(|| "failed to insert reading")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Readings not yet confirmed by the downstream publisher, oldest first,
    /// capped at `limit` so a long backlog is delivered in batches.
    pub async fn get_unsynced_readings(&self, limit: usize) -> Result<Vec<ClassifiedReading>> {
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, timestamp, voltage, force_percent, state, variance, synced
                 FROM readings
                 WHERE synced = 0
                 ORDER BY timestamp ASC, id ASC
                 LIMIT ?1",
            )?;

            let readings_iter = stmt.query_map(params![limit as i64], row_to_reading)?;

            let mut readings = Vec::new();
            for reading in readings_iter {
                readings.push(reading?);
            }
            Ok(readings)
        })
        .await
    }

    /// Mark readings as delivered. Ids that are unknown or already synced are
    /// no-ops; the return value counts rows that actually flipped.
    pub async fn mark_readings_synced(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids = ids.to_vec();
        self.execute(move |conn| {
            let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "UPDATE readings SET synced = 1 WHERE synced = 0 AND id IN ({placeholders})"
            );
            let changed = conn
                .execute(&sql, params_from_iter(ids.iter()))
                .with_context(|| "failed to mark readings synced")?;
            Ok(changed)
        })
        .await
    }

    /// Delete readings older than `cutoff`, synced or not. Returns the number
    /// of rows removed.
    pub async fn delete_readings_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        self.execute(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM readings WHERE timestamp < ?1",
                    params![format_timestamp(cutoff)],
                )
                .with_context(|| "failed to prune readings")?;
            Ok(deleted)
        })
        .await
    }

    pub async fn reading_stats(&self) -> Result<ReadingStats> {
        self.execute(|conn| {
            let (total, unsynced, oldest, newest): (i64, i64, Option<String>, Option<String>) =
                conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(synced = 0), 0),
                            MIN(timestamp),
                            MAX(timestamp)
                     FROM readings",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )?;

            Ok(ReadingStats {
                total_readings: total,
                unsynced_readings: unsynced,
                oldest_reading: oldest
                    .map(|raw| parse_datetime(&raw, "oldest_reading"))
                    .transpose()?,
                newest_reading: newest
                    .map(|raw| parse_datetime(&raw, "newest_reading"))
                    .transpose()?,
            })
        })
        .await
    }
}
