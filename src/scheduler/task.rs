//! Scheduled tasks

use crate::measurement::MeasurementDefinition;
use crate::result::TaskId;
use crate::timing::Timing;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Execution state of a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its next run
    #[default]
    Idle,
    /// A run is in progress
    Running,
    /// The last run produced a result
    Finished,
    /// The last run failed; the task is not dispatched again
    Error,
}

fn empty_options() -> Value {
    Value::Object(serde_json::Map::new())
}

/// What to run and when, as exchanged with the task source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Stable task identity
    pub task_id: TaskId,
    /// Registered measurement method, e.g. `traceroute`
    pub method: String,
    /// Method options, parsed into the method's definition
    #[serde(default = "empty_options")]
    pub options: Value,
    /// Schedule
    pub timing: Timing,
}

impl TaskSpec {
    /// Target host or URL named in the options
    pub fn target(&self) -> Option<&str> {
        self.options
            .get("host")
            .or_else(|| self.options.get("url"))
            .and_then(Value::as_str)
    }
}

/// Parse a JSON array of tasks
pub fn parse_tasks(json: &str) -> Result<Vec<TaskSpec>, serde_json::Error> {
    serde_json::from_str(json)
}

/// Snapshot of a task's scheduling state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskState {
    /// Task identity
    pub task_id: TaskId,
    /// Measurement method
    pub method: String,
    /// Execution state
    pub status: TaskStatus,
    /// Next due time; `None` once the schedule is exhausted
    pub next_run: Option<NaiveDateTime>,
    /// Message of the last failure
    pub last_error: Option<String>,
}

/// Scheduler-owned task record
pub(crate) struct ScheduledTask {
    pub(crate) spec: TaskSpec,
    pub(crate) definition: MeasurementDefinition,
    pub(crate) status: TaskStatus,
    pub(crate) next_run: Option<NaiveDateTime>,
    pub(crate) last_error: Option<String>,
    pub(crate) cancel: Option<CancellationToken>,
    /// Generation of the latest dispatched run, 0 before the first
    pub(crate) run_id: u64,
}

impl ScheduledTask {
    pub(crate) fn new(
        spec: TaskSpec,
        definition: MeasurementDefinition,
        now: NaiveDateTime,
    ) -> Self {
        let next_run = spec.timing.next_run_from(now);
        Self {
            spec,
            definition,
            status: TaskStatus::Idle,
            next_run,
            last_error: None,
            cancel: None,
            run_id: 0,
        }
    }

    /// Idle or finished, with a next run at or before `now`
    pub(crate) fn is_due(&self, now: NaiveDateTime) -> bool {
        matches!(self.status, TaskStatus::Idle | TaskStatus::Finished)
            && self.next_run.is_some_and(|next| next <= now)
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState {
            task_id: self.spec.task_id,
            method: self.spec.method.clone(),
            status: self.status,
            next_run: self.next_run,
            last_error: self.last_error.clone(),
        }
    }
}
