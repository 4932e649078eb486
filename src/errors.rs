//! Error types shared across the monitoring pipeline.
//!
//! The database layer uses `anyhow` internally; these typed errors are the
//! component boundaries the rest of the crate matches on.

use thiserror::Error;

/// Transient failure reading a voltage sample from the ADC.
///
/// The sensor driver has already exhausted its own retry budget by the time
/// this surfaces, so callers decide a fallback (hold-last-value in the tick
/// loop) instead of retrying inline.
#[derive(Debug, Error)]
#[error("voltage read failed on channel {channel}: {reason}")]
pub struct SensorReadError {
    pub channel: u8,
    pub reason: String,
}

/// Failure of a calibration attempt. Fatal to the attempt, not the process;
/// no profile is persisted when any of these occur.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(
        "occupied voltage {occupied:.3}V is too close to baseline {baseline:.3}V \
         (need at least {required:.2}V separation)"
    )]
    InsufficientSeparation {
        baseline: f64,
        occupied: f64,
        required: f64,
    },

    #[error("collected only {collected} of {requested} samples during {phase}")]
    InsufficientSamples {
        phase: &'static str,
        collected: usize,
        requested: usize,
    },

    #[error("failed to persist calibration profile")]
    Persist(#[source] anyhow::Error),

    #[error("failed to load calibration profile")]
    Load(#[source] anyhow::Error),
}

/// Transient persistence failure. Never aborts the tick loop; the reading is
/// routed into the in-memory pending queue and retried on the next drain.
#[derive(Debug, Error)]
#[error("failed to write reading to storage")]
pub struct StoreWriteError(#[source] pub anyhow::Error);
