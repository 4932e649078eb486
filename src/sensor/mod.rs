//! Voltage source seam.
//!
//! The register-level ADC protocol lives outside this crate; all the pipeline
//! sees is "read one voltage sample for a given channel, or fail". Hardware
//! drivers implement [`VoltageSource`]; the bundled [`SimulatedSource`]
//! generates a realistic occupancy cycle for development without a sensor.

mod simulated;

pub use simulated::SimulatedSource;

use crate::errors::SensorReadError;

/// One voltage reading per channel on demand. Implementations own their retry
/// budget; an `Err` here means the sample for this tick is unavailable.
pub trait VoltageSource: Send {
    fn read_voltage(&mut self, channel: u8) -> Result<f64, SensorReadError>;
}
