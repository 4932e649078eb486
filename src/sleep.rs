//! Occupancy/sleep state machine.
//!
//! Classifies each tick's `(force_percent, variance)` pair into one of four
//! states. The machine is a pure function of `(current_state, quiet_since,
//! force_percent, variance, now)`; the clock is caller-supplied so tests can
//! simulate dwell thresholds without real delays.

use std::time::{Duration, Instant};

use log::info;
use serde::{Deserialize, Serialize};

/// Continuous quiet-occupied time required before `Awake` becomes `Asleep`.
pub const DEFAULT_SLEEP_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SleepState {
    Empty,
    Awake,
    Moving,
    Asleep,
}

impl SleepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SleepState::Empty => "Empty",
            SleepState::Awake => "Awake",
            SleepState::Moving => "Moving",
            SleepState::Asleep => "Asleep",
        }
    }
}

/// Thresholds driving the transition rules, derived from the calibration
/// profile at startup.
#[derive(Debug, Clone, Copy)]
pub struct SleepThresholds {
    /// Force percentage below which the bed is empty.
    pub occupancy_threshold_percent: f64,
    /// Window variance above which the occupant is moving.
    pub movement_variance_threshold: f64,
    /// Quiet-occupied dwell required to classify as asleep.
    pub sleep_delay: Duration,
}

pub struct SleepStateMachine {
    thresholds: SleepThresholds,
    state: SleepState,
    entered_at: Instant,
    quiet_since: Instant,
}

impl SleepStateMachine {
    pub fn new(thresholds: SleepThresholds, now: Instant) -> Self {
        Self {
            thresholds,
            state: SleepState::Empty,
            entered_at: now,
            quiet_since: now,
        }
    }

    /// Advance the machine by one tick.
    ///
    /// Rules, in priority order:
    /// 1. force below the occupancy threshold -> `Empty`, regardless of
    ///    anything else (an empty bed cannot be asleep);
    /// 2. variance above the movement threshold -> `Moving`;
    /// 3. quiet and occupied for at least `sleep_delay` -> `Asleep`;
    /// 4. otherwise -> `Awake`.
    ///
    /// `quiet_since` resets on `Empty` and `Moving` ticks and is preserved
    /// across `Awake` -> `Asleep`, so the dwell timer accumulates instead of
    /// restarting every tick.
    pub fn update(&mut self, force_percent: f64, variance: f64, now: Instant) -> SleepState {
        let next = if force_percent < self.thresholds.occupancy_threshold_percent {
            SleepState::Empty
        } else if variance > self.thresholds.movement_variance_threshold {
            SleepState::Moving
        } else if now.duration_since(self.quiet_since) >= self.thresholds.sleep_delay {
            SleepState::Asleep
        } else {
            SleepState::Awake
        };

        if matches!(next, SleepState::Empty | SleepState::Moving) {
            self.quiet_since = now;
        }

        if next != self.state {
            let dwell = now.duration_since(self.entered_at);
            info!(
                "state change: {} -> {} (was {:.1}s in previous state)",
                self.state.as_str(),
                next.as_str(),
                dwell.as_secs_f64()
            );
            self.state = next;
            self.entered_at = now;
        }

        self.state
    }

    pub fn state(&self) -> SleepState {
        self.state
    }

    pub fn time_in_state(&self, now: Instant) -> Duration {
        now.duration_since(self.entered_at)
    }

    /// How long the occupant has been continuously quiet.
    pub fn quiet_for(&self, now: Instant) -> Duration {
        now.duration_since(self.quiet_since)
    }

    pub fn is_occupied(&self) -> bool {
        self.state != SleepState::Empty
    }
}
