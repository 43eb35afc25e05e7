//! Measurements and their common lifecycle
//!
//! Every measurement goes through the same steps: `prepare` validates and
//! stores a definition without touching the network, `start` runs the probes
//! to completion on the calling thread, and `result` hands out the report of
//! the last finished run. Runs block, so async callers drive them from
//! `tokio::task::spawn_blocking`.

mod definition;
mod error;
mod registry;
pub mod snmp;
mod stats;
pub mod traceroute;
pub mod udpping;

pub use definition::{
    MeasurementDefinition, PingType, SnmpDefinition, TracerouteDefinition, UdpPingDefinition,
    DEFAULT_COUNT, DEFAULT_INTERVAL_MS, DEFAULT_PAYLOAD_LEN, DEFAULT_RECEIVE_TIMEOUT_MS,
};
pub use error::{DefinitionError, MeasurementError};
pub use registry::MeasurementRegistry;
pub use snmp::Snmp;
pub use stats::RttStatistics;
pub use traceroute::Traceroute;
pub use udpping::UdpPing;

use crate::config::timing;
use crate::result::MeasurementResult;
use crate::socket::ProbeTransport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Registry name of the UDP ping
pub const UDP_PING: &str = "udpping";
/// Registry name of the traceroute
pub const TRACEROUTE: &str = "traceroute";
/// Registry name of the SNMP discovery
pub const SNMP: &str = "snmp";

/// Lifecycle state of a measurement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementStatus {
    /// Created or prepared, not run yet
    #[default]
    Unknown,
    /// Probes in flight
    Running,
    /// Last run completed and a result is available
    Finished,
    /// Last run failed
    Error,
}

/// Resources a measurement runs with
#[derive(Clone)]
pub struct MeasurementEnv {
    /// Socket factory for probes
    pub transport: Arc<dyn ProbeTransport>,
    /// Cancelled to stop the run
    pub cancel: CancellationToken,
}

impl MeasurementEnv {
    /// Environment with a fresh cancellation token
    pub fn new(transport: Arc<dyn ProbeTransport>) -> Self {
        Self {
            transport,
            cancel: CancellationToken::new(),
        }
    }

    /// Block for `duration`, waking up every poll slice to check for cancellation
    pub fn pause(&self, duration: Duration) -> Result<(), MeasurementError> {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancel.is_cancelled() {
                return Err(MeasurementError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            std::thread::sleep(remaining.min(timing::poll_slice()));
        }
    }
}

impl std::fmt::Debug for MeasurementEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementEnv")
            .field("transport", &self.transport.name())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Common capability interface of all measurements
pub trait Measurement: Send {
    /// Registry name of the method
    fn method(&self) -> &'static str;

    /// Current lifecycle state
    fn status(&self) -> MeasurementStatus;

    /// Validate and store `definition`; performs no I/O
    fn prepare(&mut self, definition: &MeasurementDefinition) -> Result<(), MeasurementError>;

    /// Run the measurement to completion
    fn start(&mut self) -> Result<(), MeasurementError>;

    /// Cancel the run and drop any collected probes
    ///
    /// Returns `true` when a run was in progress or a result was discarded.
    fn stop(&mut self) -> bool;

    /// Report of the last finished run
    fn result(&self) -> Option<MeasurementResult>;
}
