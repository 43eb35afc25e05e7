//! Measurement results and reports

mod store;

pub use store::{target_label, ResultEvent, ResultRow, ResultStore, TaskLookup, TARGET_LABEL_MAX};

use crate::measurement::snmp::SnmpReport;
use crate::measurement::traceroute::TracerouteReport;
use crate::measurement::udpping::PingReport;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity of a scheduled task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TaskId {
    fn from(id: u64) -> Self {
        TaskId(id)
    }
}

/// Protocol-specific payload of one finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementResult {
    /// UDP ping
    Ping(PingReport),
    /// Traceroute
    Traceroute(TracerouteReport),
    /// SNMP discovery
    Snmp(SnmpReport),
}

/// Results of one task, as delivered to consumers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Task the results belong to
    pub task_id: TaskId,
    /// Time of the most recent run
    pub report_time: NaiveDateTime,
    /// One entry per run, oldest first
    pub results: Vec<MeasurementResult>,
}
