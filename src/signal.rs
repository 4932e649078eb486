//! Rolling-window smoothing and movement metrics over raw voltage samples.

use std::collections::VecDeque;

use crate::db::models::CalibrationProfile;

/// Default number of samples kept in the rolling window.
pub const DEFAULT_WINDOW_SIZE: usize = 8;

/// Output of one processing step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalReading {
    /// Smoothed force as a percentage of the calibrated range, clamped to
    /// [0, 100].
    pub force_percent: f64,
    /// Population variance of the window, the movement indicator.
    pub variance: f64,
    /// Set when the raw sample read exactly 0V. A real empty bed reads the
    /// calibrated baseline, not zero; zero means a disconnected divider.
    pub sensor_fault: bool,
}

/// Maintains the rolling sample window and derives force/variance from it.
///
/// Owned exclusively by the tick loop; rebuilt from scratch on restart.
pub struct SignalProcessor {
    window: VecDeque<f64>,
    capacity: usize,
}

impl SignalProcessor {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Insert `raw_voltage` into the window (evicting the oldest sample when
    /// full) and derive the smoothed force percentage and variance.
    ///
    /// Exact-zero samples are flagged as a sensor fault and kept out of the
    /// window, so the smoothed output holds the last real readings instead of
    /// collapsing toward "empty".
    pub fn process(&mut self, raw_voltage: f64, profile: &CalibrationProfile) -> SignalReading {
        let sensor_fault = raw_voltage == 0.0;

        if !sensor_fault {
            if self.window.len() == self.capacity {
                self.window.pop_front();
            }
            self.window.push_back(raw_voltage);
        }

        if self.window.is_empty() {
            return SignalReading {
                force_percent: 0.0,
                variance: 0.0,
                sensor_fault,
            };
        }

        let values = self.window.make_contiguous();
        let smoothed = mean(values);
        let span = profile.occupied_voltage - profile.baseline_voltage;
        let force_percent = if span > 0.0 {
            ((smoothed - profile.baseline_voltage) / span * 100.0).clamp(0.0, 100.0)
        } else {
            0.0
        };

        SignalReading {
            force_percent,
            variance: population_variance(values),
            sensor_fault,
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

pub(crate) fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn test_profile() -> CalibrationProfile {
        CalibrationProfile {
            device_id: "test-device".into(),
            baseline_voltage: 0.5,
            occupied_voltage: 2.5,
            occupancy_threshold: 1.5,
            movement_variance_threshold: 0.01,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn force_percent_clamps_at_both_extremes() {
        let profile = test_profile();
        let mut processor = SignalProcessor::new(4);

        // Well below baseline clamps to 0.
        for _ in 0..4 {
            let reading = processor.process(0.1, &profile);
            assert_eq!(reading.force_percent, 0.0);
        }

        // Well above the occupied voltage clamps to 100.
        let mut processor = SignalProcessor::new(4);
        for _ in 0..4 {
            let reading = processor.process(3.2, &profile);
            assert_eq!(reading.force_percent, 100.0);
        }
    }

    #[test]
    fn force_percent_tracks_window_mean() {
        let profile = test_profile();
        let mut processor = SignalProcessor::new(4);

        processor.process(1.5, &profile);
        let reading = processor.process(1.5, &profile);
        // (1.5 - 0.5) / 2.0 = 50%
        assert!((reading.force_percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn window_evicts_oldest_sample() {
        let profile = test_profile();
        let mut processor = SignalProcessor::new(3);

        for v in [0.5, 0.5, 0.5, 2.5, 2.5, 2.5] {
            processor.process(v, &profile);
        }
        assert_eq!(processor.window_len(), 3);

        // Only the last three samples remain, so the mean sits at occupied.
        let reading = processor.process(2.5, &profile);
        assert!((reading.force_percent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn steady_signal_has_zero_variance() {
        let profile = test_profile();
        let mut processor = SignalProcessor::new(5);

        let mut last = SignalReading {
            force_percent: 0.0,
            variance: 0.0,
            sensor_fault: false,
        };
        for _ in 0..5 {
            last = processor.process(2.4, &profile);
        }
        assert_eq!(last.variance, 0.0);
    }

    #[test]
    fn mixed_signal_has_positive_variance() {
        let profile = test_profile();
        let mut processor = SignalProcessor::new(5);

        processor.process(2.0, &profile);
        let reading = processor.process(2.4, &profile);
        assert!(reading.variance > 0.0);
    }

    #[test]
    fn exact_zero_flags_fault_and_holds_window() {
        let profile = test_profile();
        let mut processor = SignalProcessor::new(4);

        for _ in 0..4 {
            processor.process(2.4, &profile);
        }
        let before = processor.process(2.4, &profile);

        let faulted = processor.process(0.0, &profile);
        assert!(faulted.sensor_fault);
        // Force output holds the previous window rather than dropping to 0.
        assert!((faulted.force_percent - before.force_percent).abs() < 1e-9);
    }

    #[test]
    fn zero_before_any_real_sample_reports_empty_window() {
        let profile = test_profile();
        let mut processor = SignalProcessor::new(4);

        let reading = processor.process(0.0, &profile);
        assert!(reading.sensor_fault);
        assert_eq!(reading.force_percent, 0.0);
        assert_eq!(reading.variance, 0.0);
        assert_eq!(processor.window_len(), 0);
    }
}
