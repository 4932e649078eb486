use std::time::Instant;

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::db::models::CalibrationProfile;
use crate::errors::SensorReadError;

use super::VoltageSource;

const BASELINE_VOLTS: f64 = 0.5;
const OCCUPIED_VOLTS: f64 = 2.0;
const SUPPLY_VOLTS: f64 = 3.3;
const TRANSITION_SECS: f64 = 5.0;
/// Window variance of the occupied phase's noise sits well under this; the
/// restless phase's shifting sits well over it.
const SIM_MOVEMENT_VARIANCE: f64 = 0.002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SimPhase {
    Empty,
    GettingIn,
    Occupied,
    Restless,
    GettingUp,
}

/// Scripted occupancy cycle standing in for the real force sensor.
///
/// Cycles empty bed -> getting in -> occupied (with a slow breathing
/// oscillation) -> occasional restless bursts -> getting up, with phase
/// durations and noise drawn from an internal RNG. Output is clamped to the
/// ADC's measurable range.
pub struct SimulatedSource {
    rng: StdRng,
    phase: SimPhase,
    started: Instant,
    phase_started: Instant,
    phase_hold_secs: f64,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Seeded constructor so tests get a reproducible cycle.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Calibration profile matching the voltages this source generates.
    ///
    /// The cycle's phase timing makes the two-phase sampling procedure
    /// meaningless (the bed occupies itself on its own schedule), so
    /// simulation runs use this preset instead of sampling.
    pub fn preset_profile(device_id: &str) -> CalibrationProfile {
        CalibrationProfile {
            device_id: device_id.to_string(),
            baseline_voltage: BASELINE_VOLTS,
            occupied_voltage: OCCUPIED_VOLTS,
            occupancy_threshold: (BASELINE_VOLTS + OCCUPIED_VOLTS) / 2.0,
            movement_variance_threshold: SIM_MOVEMENT_VARIANCE,
            created_at: Utc::now(),
        }
    }

    fn with_rng(mut rng: StdRng) -> Self {
        let now = Instant::now();
        let hold = rng.gen_range(10.0..60.0);
        Self {
            rng,
            phase: SimPhase::Empty,
            started: now,
            phase_started: now,
            phase_hold_secs: hold,
        }
    }

    fn enter_phase(&mut self, phase: SimPhase, hold_secs: f64) {
        self.phase = phase;
        self.phase_started = Instant::now();
        self.phase_hold_secs = hold_secs;
    }

    fn noise(&mut self, amplitude: f64) -> f64 {
        self.rng.gen_range(-amplitude..amplitude)
    }

    fn next_voltage(&mut self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        let in_phase = self.phase_started.elapsed().as_secs_f64();

        let voltage = match self.phase {
            SimPhase::Empty => {
                if in_phase > self.phase_hold_secs {
                    self.enter_phase(SimPhase::GettingIn, TRANSITION_SECS);
                }
                BASELINE_VOLTS + self.noise(0.02)
            }
            SimPhase::GettingIn => {
                let progress = (in_phase / TRANSITION_SECS).min(1.0);
                if progress >= 1.0 {
                    let hold = self.rng.gen_range(30.0..90.0);
                    self.enter_phase(SimPhase::Occupied, hold);
                }
                BASELINE_VOLTS + (OCCUPIED_VOLTS - BASELINE_VOLTS) * progress + self.noise(0.1)
            }
            SimPhase::Occupied => {
                if in_phase > 20.0 && self.rng.gen_bool(0.02) {
                    let hold = self.rng.gen_range(5.0..10.0);
                    self.enter_phase(SimPhase::Restless, hold);
                } else if in_phase > self.phase_hold_secs && self.rng.gen_bool(0.05) {
                    self.enter_phase(SimPhase::GettingUp, TRANSITION_SECS);
                }
                let breathing = 0.05 * (elapsed * 0.3).sin();
                OCCUPIED_VOLTS + breathing + self.noise(0.03)
            }
            SimPhase::Restless => {
                if in_phase > self.phase_hold_secs {
                    let hold = self.rng.gen_range(30.0..90.0);
                    self.enter_phase(SimPhase::Occupied, hold);
                }
                let shifting = 0.3 * (elapsed * 2.0).sin();
                (OCCUPIED_VOLTS - 0.2) + shifting + self.noise(0.15)
            }
            SimPhase::GettingUp => {
                let progress = (in_phase / TRANSITION_SECS).min(1.0);
                if progress >= 1.0 {
                    let hold = self.rng.gen_range(10.0..60.0);
                    self.enter_phase(SimPhase::Empty, hold);
                }
                OCCUPIED_VOLTS - (OCCUPIED_VOLTS - BASELINE_VOLTS) * progress + self.noise(0.1)
            }
        };

        voltage.clamp(0.0, SUPPLY_VOLTS)
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VoltageSource for SimulatedSource {
    fn read_voltage(&mut self, _channel: u8) -> Result<f64, SensorReadError> {
        Ok(self.next_voltage())
    }
}
