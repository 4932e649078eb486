//! Runtime configuration loaded from a JSON file.
//!
//! A missing file or unreadable field falls back to defaults, so a bare
//! deployment starts with a sensible simulated setup.

use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::monitor::LoopSettings;
use crate::signal::DEFAULT_WINDOW_SIZE;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub device_id: String,
    pub user_id: String,
    /// ADC channel the force sensor's divider is wired to.
    pub channel: u8,
    pub db_path: PathBuf,
    pub tick_interval_ms: u64,
    /// Drain/prune maintenance cadence, counted in ticks.
    pub maintenance_every_ticks: u64,
    pub window_size: usize,
    pub sleep_delay_secs: u64,
    /// Overrides the occupancy threshold derived from the calibration
    /// profile. Unset means the profile's midpoint is used.
    pub occupancy_threshold_percent: Option<f64>,
    /// Use the built-in simulated voltage source instead of hardware.
    pub simulation: bool,
    /// Re-run calibration on startup even when a profile is stored.
    pub force_recalibration: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            device_id: "bed-node-1".into(),
            user_id: "user-001".into(),
            channel: 0,
            db_path: "sleepsense.sqlite3".into(),
            tick_interval_ms: 100,
            maintenance_every_ticks: 600,
            window_size: DEFAULT_WINDOW_SIZE,
            sleep_delay_secs: 60,
            occupancy_threshold_percent: None,
            simulation: true,
            force_recalibration: false,
        }
    }
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        match serde_json::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(err) => {
                warn!("config at {} is invalid, using defaults: {err}", path.display());
                Ok(Self::default())
            }
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn sleep_delay(&self) -> Duration {
        Duration::from_secs(self.sleep_delay_secs)
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            channel: self.channel,
            tick_interval: self.tick_interval(),
            maintenance_every_ticks: self.maintenance_every_ticks.max(1),
            window_size: self.window_size,
            sleep_delay: self.sleep_delay(),
            occupancy_threshold_percent: self.occupancy_threshold_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("sleepsense-missing-{}.json", uuid::Uuid::new_v4()));
        let config = MonitorConfig::load(&path).expect("defaults on missing file");
        assert_eq!(config.tick_interval_ms, 100);
        assert_eq!(config.window_size, DEFAULT_WINDOW_SIZE);
        assert!(config.occupancy_threshold_percent.is_none());
        assert!(config.simulation);
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_fields() {
        let path = std::env::temp_dir().join(format!("sleepsense-partial-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, r#"{"device_id": "bed-7", "tick_interval_ms": 250}"#).unwrap();

        let config = MonitorConfig::load(&path).expect("partial config loads");
        assert_eq!(config.device_id, "bed-7");
        assert_eq!(config.tick_interval(), Duration::from_millis(250));
        assert_eq!(config.sleep_delay_secs, 60);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn invalid_json_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("sleepsense-bad-{}.json", uuid::Uuid::new_v4()));
        fs::write(&path, "{not json").unwrap();

        let config = MonitorConfig::load(&path).expect("invalid config falls back");
        assert_eq!(config.device_id, "bed-node-1");

        let _ = fs::remove_file(&path);
    }
}
