//! Utility modules for pawscope-telemetry

pub mod pool_monitor;

pub use pool_monitor::{begin_monitored, begin_monitored_write, MonitoredTransaction};
