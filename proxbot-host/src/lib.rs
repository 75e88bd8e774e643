//! proxbot-host - readings and process execution on the hypervisor host
//!
//! Used by the proxbot kernel for:
//! - Alert checks and the `/status` summary (`metrics`)
//! - Host shell and container exec with timeouts (`execution`)

pub mod execution;
pub mod metrics;

pub use execution::{CommandRunner, ExecError, ExecOutput, ProcessRunner};
pub use metrics::{HostMetrics, SensorReading, SysinfoCollector};
