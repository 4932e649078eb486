pub mod calibration;
pub mod reading;

pub use calibration::CalibrationProfile;
pub use reading::{ClassifiedReading, ReadingStats, TransportPayload};
