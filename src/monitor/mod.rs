//! The sampling tick loop and its controller.

mod controller;
mod loop_worker;

pub use controller::MonitorController;
pub use loop_worker::{monitor_loop, DeviceHealth, LoopSettings};
