pub mod monitor;

pub use monitor::{HealthMonitor, MetricRecord};
