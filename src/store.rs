//! Durable readings store with offline buffering.
//!
//! Wraps the database with the bookkeeping the tick loop relies on: writes
//! that fail land in an in-memory pending queue instead of being lost, the
//! queue is drained opportunistically, old rows are pruned on a rolling
//! retention horizon, and sync flags track downstream delivery.

use std::collections::VecDeque;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::Serialize;

use crate::db::{
    models::{ClassifiedReading, TransportPayload},
    Database,
};
use crate::errors::StoreWriteError;

/// Readings older than this are eligible for deletion regardless of sync
/// state.
pub const RETENTION_DAYS: i64 = 30;

const SENSOR_TYPE: &str = "fsr408";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The reading reached durable storage.
    Stored,
    /// The write failed; the reading sits in the pending queue until a drain
    /// succeeds.
    Queued,
}

/// Store counters for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_readings: i64,
    pub unsynced_readings: i64,
    pub oldest_reading: Option<DateTime<Utc>>,
    pub newest_reading: Option<DateTime<Utc>>,
    pub pending_queue_len: usize,
    pub insert_failures: u64,
}

pub struct ReadingsStore {
    db: Database,
    device_id: String,
    user_id: String,
    channel: u8,
    pending: VecDeque<ClassifiedReading>,
    insert_failures: u64,
    #[cfg(test)]
    fail_next_inserts: u32,
}

impl ReadingsStore {
    pub fn new(db: Database, device_id: String, user_id: String, channel: u8) -> Self {
        Self {
            db,
            device_id,
            user_id,
            channel,
            pending: VecDeque::new(),
            insert_failures: 0,
            #[cfg(test)]
            fail_next_inserts: 0,
        }
    }

    /// Append one reading. A failed write is queued in memory and retried on
    /// later drains; the tick loop never sees the failure as fatal.
    pub async fn insert(&mut self, reading: ClassifiedReading) -> InsertOutcome {
        match self.insert_durable(&reading).await {
            Ok(_) => {
                if !self.pending.is_empty() {
                    self.drain_pending().await;
                }
                InsertOutcome::Stored
            }
            Err(err) => {
                self.insert_failures += 1;
                self.pending.push_back(reading);
                warn!(
                    "reading write failed, queued in memory (queue length {}): {err}",
                    self.pending.len()
                );
                InsertOutcome::Queued
            }
        }
    }

    async fn insert_durable(&mut self, reading: &ClassifiedReading) -> Result<i64, StoreWriteError> {
        #[cfg(test)]
        if self.fail_next_inserts > 0 {
            self.fail_next_inserts -= 1;
            return Err(StoreWriteError(anyhow::anyhow!("injected write failure")));
        }

        self.db
            .insert_reading(reading, &self.device_id, &self.user_id)
            .await
            .map_err(StoreWriteError)
    }

    /// Flush queued readings into durable storage in their original order.
    /// Stops at the first entry that still fails; everything from there on
    /// stays queued for the next attempt.
    pub async fn drain_pending(&mut self) -> usize {
        let mut flushed = 0;
        while let Some(reading) = self.pending.pop_front() {
            match self.insert_durable(&reading).await {
                Ok(_) => flushed += 1,
                Err(err) => {
                    warn!("pending drain stopped, {} still queued: {err}", self.pending.len() + 1);
                    self.pending.push_front(reading);
                    break;
                }
            }
        }

        if flushed > 0 {
            info!("flushed {flushed} queued readings to storage");
        }
        flushed
    }

    /// Delete rows older than `cutoff`, synced or not.
    pub async fn prune_retention(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self.db.delete_readings_before(cutoff).await?;
        if deleted > 0 {
            info!("pruned {deleted} readings older than {cutoff}");
        }
        Ok(deleted)
    }

    /// The retention cutoff as of `now`.
    pub fn retention_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(RETENTION_DAYS)
    }

    /// Readings not yet confirmed delivered, oldest first, at most `limit`
    /// per call so the publisher works in bounded batches.
    pub async fn get_unsynced(&self, limit: usize) -> Result<Vec<ClassifiedReading>> {
        self.db.get_unsynced_readings(limit).await
    }

    /// Mark readings delivered. Idempotent: ids already synced are no-ops.
    pub async fn mark_synced(&self, ids: &[i64]) -> Result<usize> {
        self.db.mark_readings_synced(ids).await
    }

    /// Map a reading onto the wire record consumed by the downstream
    /// publisher.
    pub fn to_transport_payload(&self, reading: &ClassifiedReading) -> TransportPayload {
        TransportPayload {
            timestamp: reading.timestamp,
            sensor_type: SENSOR_TYPE.to_string(),
            channel: self.channel,
            voltage: reading.voltage,
            force_percent: reading.force_percent,
            state: reading.state.as_str().to_string(),
            variance: reading.variance,
            device_id: self.device_id.clone(),
            user_id: self.user_id.clone(),
        }
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let stats = self.db.reading_stats().await?;
        Ok(StoreStats {
            total_readings: stats.total_readings,
            unsynced_readings: stats.unsynced_readings,
            oldest_reading: stats.oldest_reading,
            newest_reading: stats.newest_reading,
            pending_queue_len: self.pending.len(),
            insert_failures: self.insert_failures,
        })
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
