//! Per-instance server health monitoring.

mod probe;
mod types;
mod watcher;

pub use probe::{HttpStatusProbe, StatusProbe};
pub use types::{MonitorOutcome, ProbeError, ReportState, StatusReport};
pub use watcher::ServerMonitor;
