//! Two-phase calibration procedure.
//!
//! Phase 1 samples the empty bed to establish the baseline voltage and the
//! sensor's noise floor; phase 2 samples the occupied bed. The derived profile
//! is persisted per device and loaded on subsequent startups instead of
//! re-running the procedure.

use std::time::Duration;

use chrono::Utc;
use log::{info, warn};

use crate::db::{models::CalibrationProfile, Database};
use crate::errors::CalibrationError;
use crate::sensor::VoltageSource;
use crate::signal::{mean, population_variance};

/// Minimum voltage separation between the two phase means. Anything smaller
/// cannot distinguish occupancy from noise reliably.
pub const MIN_SEPARATION_VOLTS: f64 = 0.5;

/// The movement threshold is the empty-bed sample variance scaled by this
/// multiplier, floored at [`MIN_MOVEMENT_VARIANCE`].
const NOISE_VARIANCE_MULTIPLIER: f64 = 4.0;
const MIN_MOVEMENT_VARIANCE: f64 = 0.001;

#[derive(Debug, Clone)]
pub struct CalibrationOptions {
    /// Readings collected per phase.
    pub sample_count: usize,
    /// Wall time the readings of one phase are spread evenly over.
    pub sample_duration: Duration,
    /// Pause between the empty and occupied phases, giving the occupant time
    /// to get into position.
    pub settle_delay: Duration,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            sample_count: 50,
            sample_duration: Duration::from_secs(5),
            settle_delay: Duration::from_secs(2),
        }
    }
}

pub struct CalibrationEngine {
    db: Database,
    device_id: String,
    channel: u8,
}

impl CalibrationEngine {
    pub fn new(db: Database, device_id: String, channel: u8) -> Self {
        Self {
            db,
            device_id,
            channel,
        }
    }

    /// Load the stored profile for this device, or run the calibration
    /// procedure if none exists. `force` re-runs and overwrites an existing
    /// profile.
    pub async fn ensure_profile(
        &self,
        source: &mut dyn VoltageSource,
        options: &CalibrationOptions,
        force: bool,
    ) -> Result<CalibrationProfile, CalibrationError> {
        if !force {
            if let Some(profile) = self
                .db
                .load_calibration_profile(&self.device_id)
                .await
                .map_err(CalibrationError::Load)?
            {
                info!(
                    "calibration loaded for {} (created {})",
                    profile.device_id, profile.created_at
                );
                return Ok(profile);
            }
            info!("no calibration found for {}, running procedure", self.device_id);
        }

        self.run(source, options).await
    }

    /// Load the stored profile, or persist `preset` if none exists. For
    /// sources with known characteristics (the simulated sensor) where the
    /// sampling procedure does not apply. `force` overwrites as in
    /// [`Self::ensure_profile`].
    pub async fn ensure_preset(
        &self,
        preset: CalibrationProfile,
        force: bool,
    ) -> Result<CalibrationProfile, CalibrationError> {
        if !force {
            if let Some(profile) = self
                .db
                .load_calibration_profile(&self.device_id)
                .await
                .map_err(CalibrationError::Load)?
            {
                info!(
                    "calibration loaded for {} (created {})",
                    profile.device_id, profile.created_at
                );
                return Ok(profile);
            }
        }

        self.db
            .save_calibration_profile(&preset)
            .await
            .map_err(CalibrationError::Persist)?;
        info!(
            "preset calibration stored for {}: threshold {:.3}V, movement variance {:.5}",
            preset.device_id, preset.occupancy_threshold, preset.movement_variance_threshold
        );
        Ok(preset)
    }

    /// Run both phases and persist the resulting profile. Fails without
    /// persisting anything when the phase means are too close together.
    pub async fn run(
        &self,
        source: &mut dyn VoltageSource,
        options: &CalibrationOptions,
    ) -> Result<CalibrationProfile, CalibrationError> {
        info!(
            "calibrating {}: phase 1, bed empty ({} samples over {:?})",
            self.device_id, options.sample_count, options.sample_duration
        );
        let baseline_samples = self.collect_samples(source, options, "baseline phase").await?;
        let baseline_voltage = mean(&baseline_samples);
        let baseline_variance = population_variance(&baseline_samples);
        info!(
            "baseline measured: {:.3}V (variance {:.5})",
            baseline_voltage, baseline_variance
        );

        tokio::time::sleep(options.settle_delay).await;

        info!("calibrating {}: phase 2, bed occupied", self.device_id);
        let occupied_samples = self.collect_samples(source, options, "occupied phase").await?;
        let occupied_voltage = mean(&occupied_samples);
        info!("occupied measured: {:.3}V", occupied_voltage);

        if occupied_voltage - baseline_voltage < MIN_SEPARATION_VOLTS {
            return Err(CalibrationError::InsufficientSeparation {
                baseline: baseline_voltage,
                occupied: occupied_voltage,
                required: MIN_SEPARATION_VOLTS,
            });
        }

        let profile = CalibrationProfile {
            device_id: self.device_id.clone(),
            baseline_voltage,
            occupied_voltage,
            occupancy_threshold: (baseline_voltage + occupied_voltage) / 2.0,
            movement_variance_threshold: (baseline_variance * NOISE_VARIANCE_MULTIPLIER)
                .max(MIN_MOVEMENT_VARIANCE),
            created_at: Utc::now(),
        };

        self.db
            .save_calibration_profile(&profile)
            .await
            .map_err(CalibrationError::Persist)?;

        info!(
            "calibration complete: threshold {:.3}V, movement variance {:.5}",
            profile.occupancy_threshold, profile.movement_variance_threshold
        );

        Ok(profile)
    }

    /// Collect one phase's samples spread evenly over the sample duration.
    /// Individual failed reads are skipped; the phase fails only when fewer
    /// than half the requested samples survive.
    async fn collect_samples(
        &self,
        source: &mut dyn VoltageSource,
        options: &CalibrationOptions,
        phase: &'static str,
    ) -> Result<Vec<f64>, CalibrationError> {
        let interval = if options.sample_count > 0 {
            options.sample_duration / options.sample_count as u32
        } else {
            Duration::ZERO
        };

        let mut samples = Vec::with_capacity(options.sample_count);
        for _ in 0..options.sample_count {
            match source.read_voltage(self.channel) {
                Ok(voltage) => samples.push(voltage),
                Err(err) => warn!("skipping failed read during {phase}: {err}"),
            }
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        if samples.len() < (options.sample_count / 2).max(2) {
            return Err(CalibrationError::InsufficientSamples {
                phase,
                collected: samples.len(),
                requested: options.sample_count,
            });
        }

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::PathBuf;

    use super::*;
    use crate::errors::SensorReadError;

    /// Plays back a fixed sequence of read results.
    struct ScriptedSource {
        script: VecDeque<Result<f64, SensorReadError>>,
    }

    impl ScriptedSource {
        fn new(script: impl IntoIterator<Item = Result<f64, SensorReadError>>) -> Self {
            Self {
                script: script.into_iter().collect(),
            }
        }

        fn constant_phases(empty: f64, occupied: f64, per_phase: usize) -> Self {
            let mut script = VecDeque::new();
            script.extend((0..per_phase).map(|_| Ok(empty)));
            script.extend((0..per_phase).map(|_| Ok(occupied)));
            Self { script }
        }
    }

    impl VoltageSource for ScriptedSource {
        fn read_voltage(&mut self, channel: u8) -> Result<f64, SensorReadError> {
            self.script.pop_front().unwrap_or(Err(SensorReadError {
                channel,
                reason: "script exhausted".into(),
            }))
        }
    }

    fn instant_options() -> CalibrationOptions {
        CalibrationOptions {
            sample_count: 10,
            sample_duration: Duration::ZERO,
            settle_delay: Duration::ZERO,
        }
    }

    struct TempDb {
        db: Database,
        path: PathBuf,
    }

    impl TempDb {
        fn open() -> Self {
            let path = std::env::temp_dir().join(format!(
                "sleepsense-cal-test-{}.sqlite3",
                uuid::Uuid::new_v4()
            ));
            let db = Database::new(path.clone()).expect("open test database");
            Self { db, path }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }

    #[tokio::test]
    async fn derives_midpoint_threshold_and_persists() {
        let tmp = TempDb::open();
        let engine = CalibrationEngine::new(tmp.db.clone(), "bed-node-1".into(), 0);
        let mut source = ScriptedSource::constant_phases(0.5, 2.5, 10);

        let profile = engine
            .run(&mut source, &instant_options())
            .await
            .expect("calibration succeeds");

        assert!((profile.baseline_voltage - 0.5).abs() < 1e-9);
        assert!((profile.occupied_voltage - 2.5).abs() < 1e-9);
        assert!((profile.occupancy_threshold - 1.5).abs() < 1e-9);
        // Constant empty-bed samples have zero variance, so the floor applies.
        assert!((profile.movement_variance_threshold - 0.001).abs() < 1e-12);

        let stored = tmp
            .db
            .load_calibration_profile("bed-node-1")
            .await
            .expect("load succeeds")
            .expect("profile persisted");
        assert_eq!(stored.occupancy_threshold, profile.occupancy_threshold);
    }

    #[tokio::test]
    async fn insufficient_separation_fails_and_persists_nothing() {
        let tmp = TempDb::open();
        let engine = CalibrationEngine::new(tmp.db.clone(), "bed-node-1".into(), 0);
        let mut source = ScriptedSource::constant_phases(0.5, 0.8, 10);

        let err = engine
            .run(&mut source, &instant_options())
            .await
            .expect_err("separation below 0.5V is rejected");
        assert!(matches!(
            err,
            CalibrationError::InsufficientSeparation { .. }
        ));

        let stored = tmp
            .db
            .load_calibration_profile("bed-node-1")
            .await
            .expect("load succeeds");
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn ensure_profile_is_idempotent_unless_forced() {
        let tmp = TempDb::open();
        let engine = CalibrationEngine::new(tmp.db.clone(), "bed-node-1".into(), 0);

        let mut first = ScriptedSource::constant_phases(0.5, 2.5, 10);
        let original = engine
            .ensure_profile(&mut first, &instant_options(), false)
            .await
            .expect("first calibration succeeds");

        // A second run without force never touches the source.
        let mut untouched = ScriptedSource::new([]);
        let loaded = engine
            .ensure_profile(&mut untouched, &instant_options(), false)
            .await
            .expect("loads stored profile");
        assert_eq!(loaded.baseline_voltage, original.baseline_voltage);
        assert_eq!(loaded.occupied_voltage, original.occupied_voltage);
        assert_eq!(loaded.occupancy_threshold, original.occupancy_threshold);
        assert_eq!(
            loaded.movement_variance_threshold,
            original.movement_variance_threshold
        );

        // Forcing re-runs the procedure and overwrites.
        let mut second = ScriptedSource::constant_phases(0.6, 2.8, 10);
        let replaced = engine
            .ensure_profile(&mut second, &instant_options(), true)
            .await
            .expect("forced recalibration succeeds");
        assert!((replaced.occupancy_threshold - 1.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn preset_skips_sampling_and_respects_stored_profile() {
        let tmp = TempDb::open();
        let engine = CalibrationEngine::new(tmp.db.clone(), "bed-node-1".into(), 0);

        let preset = crate::sensor::SimulatedSource::preset_profile("bed-node-1");
        let stored = engine
            .ensure_preset(preset.clone(), false)
            .await
            .expect("preset persists");
        assert_eq!(stored.occupancy_threshold, preset.occupancy_threshold);

        // A sampled profile already in the store wins over the preset.
        let mut source = ScriptedSource::constant_phases(0.5, 2.5, 10);
        let sampled = engine
            .run(&mut source, &instant_options())
            .await
            .expect("recalibration succeeds");
        let kept = engine
            .ensure_preset(preset, false)
            .await
            .expect("load succeeds");
        assert_eq!(kept.occupancy_threshold, sampled.occupancy_threshold);
    }

    #[tokio::test]
    async fn transient_read_failures_are_skipped() {
        let tmp = TempDb::open();
        let engine = CalibrationEngine::new(tmp.db.clone(), "bed-node-1".into(), 0);

        // Every other read fails in phase 1; enough samples still survive.
        let mut script: Vec<Result<f64, SensorReadError>> = Vec::new();
        for i in 0..10 {
            if i % 2 == 0 {
                script.push(Ok(0.5));
            } else {
                script.push(Err(SensorReadError {
                    channel: 0,
                    reason: "i2c timeout".into(),
                }));
            }
        }
        script.extend((0..10).map(|_| Ok(2.5)));
        let mut source = ScriptedSource::new(script);

        let profile = engine
            .run(&mut source, &instant_options())
            .await
            .expect("calibration tolerates transient failures");
        assert!((profile.baseline_voltage - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn too_many_failures_abort_the_phase() {
        let tmp = TempDb::open();
        let engine = CalibrationEngine::new(tmp.db.clone(), "bed-node-1".into(), 0);

        let script = (0..20).map(|_| {
            Err(SensorReadError {
                channel: 0,
                reason: "sensor unplugged".into(),
            })
        });
        let mut source = ScriptedSource::new(script);

        let err = engine
            .run(&mut source, &instant_options())
            .await
            .expect_err("all-failing phase aborts");
        assert!(matches!(err, CalibrationError::InsufficientSamples { .. }));
    }
}
