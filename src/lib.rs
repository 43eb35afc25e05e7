//! mprobe - scheduled active network measurements
//!
//! This library runs UDP ping, UDP traceroute and SNMP discovery tasks on a
//! schedule and aggregates their results per task.
//!
//! Probes use one UDP socket per cycle with `IP_RECVERR`, so ICMP errors are
//! read from the socket error queue and no raw sockets (or root) are needed.

pub mod clock;
pub mod config;
pub mod context;
pub mod measurement;
pub mod result;
pub mod scheduler;
pub mod socket;
pub mod timing;

// Re-export core types for library users
pub use clock::{ManualClock, NetworkClock, SystemClock};
pub use config::AgentConfig;
pub use context::Context;
pub use measurement::{
    DefinitionError, Measurement, MeasurementDefinition, MeasurementEnv, MeasurementError,
    MeasurementRegistry, MeasurementStatus,
};
pub use result::{MeasurementResult, Report, ResultEvent, ResultStore, TaskId};
pub use scheduler::{Scheduler, SchedulerError, SchedulerEvent, TaskSpec, TaskState, TaskStatus};
pub use socket::{ProbeTransport, TransportError};
pub use timing::{CalendarTiming, ImmediateTiming, PeriodicTiming, Timing, MAX_PERIODIC_INTERVAL_MS};
