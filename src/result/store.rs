//! Result aggregation
//!
//! The store keeps one [`Report`] per task, in order of first appearance,
//! and announces every change as an [`ResultEvent`] on a broadcast channel so
//! consumers can update incrementally.

use super::{MeasurementResult, Report, TaskId};
use crate::scheduler::TaskSpec;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Longest target label shown without truncation
pub const TARGET_LABEL_MAX: usize = 35;
const TARGET_LABEL_KEEP: usize = 32;
const EVENT_CAPACITY: usize = 256;

/// Change to the stored reports
#[derive(Debug, Clone, PartialEq)]
pub enum ResultEvent {
    /// First report of a task
    Added {
        /// Index of the report in the store
        position: usize,
        /// The report after the change
        report: Report,
    },
    /// A further run was appended to an existing report
    Modified {
        /// Index of the report in the store
        position: usize,
        /// The report after the change
        report: Report,
    },
}

impl ResultEvent {
    /// Report carried by the event
    pub fn report(&self) -> &Report {
        match self {
            ResultEvent::Added { report, .. } | ResultEvent::Modified { report, .. } => report,
        }
    }

    /// Task the event belongs to
    pub fn task_id(&self) -> TaskId {
        self.report().task_id
    }
}

/// Source of task metadata for presentation rows
pub trait TaskLookup {
    /// Task registered under `task_id`
    fn task_by_task_id(&self, task_id: TaskId) -> Option<TaskSpec>;
}

/// One report as shown to a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultRow {
    /// Task identity
    pub task_id: TaskId,
    /// Time of the most recent run
    pub report_time: NaiveDateTime,
    /// Measurement method, upper-cased
    pub method: String,
    /// Target host or URL, shortened for display
    pub target: String,
}

#[derive(Default)]
struct Inner {
    reports: Vec<Report>,
    index: HashMap<TaskId, usize>,
}

/// Thread-safe collection of reports keyed by task
pub struct ResultStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ResultEvent>,
    results_per_task: usize,
}

impl ResultStore {
    /// Create a store keeping at most `results_per_task` results per report
    pub fn new(results_per_task: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner::default()),
            events,
            results_per_task: results_per_task.max(1),
        }
    }

    /// Receive every later change
    pub fn subscribe(&self) -> broadcast::Receiver<ResultEvent> {
        self.events.subscribe()
    }

    /// Append the result of one run of `task_id`
    ///
    /// The oldest results are dropped once the report is full.
    pub fn record(
        &self,
        task_id: TaskId,
        report_time: NaiveDateTime,
        result: MeasurementResult,
    ) -> ResultEvent {
        let mut inner = self.inner.lock().expect("mutex poisoned");

        let event = match inner.index.get(&task_id).copied() {
            Some(position) => {
                let report = &mut inner.reports[position];
                report.report_time = report_time;
                report.results.push(result);
                if report.results.len() > self.results_per_task {
                    let excess = report.results.len() - self.results_per_task;
                    report.results.drain(..excess);
                }
                ResultEvent::Modified {
                    position,
                    report: report.clone(),
                }
            }
            None => {
                let position = inner.reports.len();
                let report = Report {
                    task_id,
                    report_time,
                    results: vec![result],
                };
                inner.reports.push(report.clone());
                inner.index.insert(task_id, position);
                ResultEvent::Added { position, report }
            }
        };

        // Sent under the lock so subscribers see changes in index order
        let _ = self.events.send(event.clone());
        event
    }

    /// Report of `task_id`
    pub fn report(&self, task_id: TaskId) -> Option<Report> {
        let inner = self.inner.lock().expect("mutex poisoned");
        inner
            .index
            .get(&task_id)
            .map(|&position| inner.reports[position].clone())
    }

    /// Every report in order of first appearance
    pub fn reports(&self) -> Vec<Report> {
        self.inner.lock().expect("mutex poisoned").reports.clone()
    }

    /// Number of reports
    pub fn len(&self) -> usize {
        self.inner.lock().expect("mutex poisoned").reports.len()
    }

    /// Whether no report exists
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the report of `task_id`
    pub fn remove(&self, task_id: TaskId) -> Option<Report> {
        let mut inner = self.inner.lock().expect("mutex poisoned");
        let position = inner.index.remove(&task_id)?;
        let report = inner.reports.remove(position);
        for slot in inner.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        Some(report)
    }

    /// Presentation rows, one per report
    pub fn rows(&self, lookup: &dyn TaskLookup) -> Vec<ResultRow> {
        self.reports()
            .into_iter()
            .map(|report| {
                let task = lookup.task_by_task_id(report.task_id);
                ResultRow {
                    task_id: report.task_id,
                    report_time: report.report_time,
                    method: task
                        .as_ref()
                        .map(|t| t.method.to_uppercase())
                        .unwrap_or_default(),
                    target: task
                        .as_ref()
                        .and_then(TaskSpec::target)
                        .map(target_label)
                        .unwrap_or_default(),
                }
            })
            .collect()
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new(crate::config::AgentConfig::default().scheduler.results_per_task)
    }
}

/// Shorten `target` to 32 characters plus an ellipsis when it is too long
pub fn target_label(target: &str) -> String {
    if target.chars().count() > TARGET_LABEL_MAX {
        let kept: String = target.chars().take(TARGET_LABEL_KEEP).collect();
        format!("{kept}...")
    } else {
        target.to_string()
    }
}
