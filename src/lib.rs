//! Bed-occupancy and sleep monitoring pipeline.
//!
//! A force-sensitive resistor under the mattress feeds a fixed-period
//! sampling loop: each tick reads one voltage sample, smooths it over a
//! rolling window, classifies the occupancy/sleep state, and persists the
//! result with sync bookkeeping for a downstream publisher.

pub mod calibration;
pub mod config;
pub mod db;
pub mod errors;
pub mod monitor;
pub mod sensor;
pub mod signal;
pub mod sleep;
pub mod store;

pub use calibration::{CalibrationEngine, CalibrationOptions};
pub use config::MonitorConfig;
pub use db::{CalibrationProfile, ClassifiedReading, Database};
pub use monitor::{DeviceHealth, MonitorController};
pub use sensor::{SimulatedSource, VoltageSource};
pub use sleep::SleepState;
pub use store::ReadingsStore;
