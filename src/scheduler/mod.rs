//! Task scheduler
//!
//! The scheduler owns every task, decides which are due against the network
//! clock and runs each due task's measurement on the blocking thread pool.
//! The dispatch loop itself never blocks on a probe: it only sleeps until the
//! next due time, the next tick, or a change to the task set.
//!
//! A task runs at most once at a time. On completion its result goes to the
//! [`ResultStore`], its status becomes `Finished` (or `Error`, which is final)
//! and its next run is recomputed from the timing. A completion is applied
//! only while its run is still the task's latest one; a run that outlived
//! the removal of its task leaves no trace.

mod task;

pub use task::{parse_tasks, TaskSpec, TaskState, TaskStatus};

use crate::config::timing;
use crate::context::Context;
use crate::measurement::{DefinitionError, MeasurementEnv, MeasurementError};
use crate::result::{ResultStore, TaskId, TaskLookup};
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use task::ScheduledTask;
use thiserror::Error;
use tokio::sync::{broadcast, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Errors managing the task set
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A task with this identity is already scheduled
    #[error("Task {0} is already scheduled")]
    DuplicateTask(TaskId),

    /// No task with this identity exists
    #[error("Unknown task {0}")]
    UnknownTask(TaskId),

    /// The task's method or options are invalid
    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

/// Task lifecycle notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A task changed status
    StatusChanged {
        /// Task identity
        task_id: TaskId,
        /// New status
        status: TaskStatus,
    },
    /// A task run failed
    Error {
        /// Task identity
        task_id: TaskId,
        /// Failure description
        message: String,
    },
}

struct Shared {
    context: Context,
    results: Arc<ResultStore>,
    tasks: Mutex<BTreeMap<TaskId, ScheduledTask>>,
    events: broadcast::Sender<SchedulerEvent>,
    wake: Notify,
    permits: Arc<Semaphore>,
    tick: Duration,
    next_run_id: AtomicU64,
}

/// Owner of all scheduled tasks
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    /// Create a scheduler running at most `max_concurrent` tasks at once
    pub fn new(context: Context, results: Arc<ResultStore>, max_concurrent: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                context,
                results,
                tasks: Mutex::new(BTreeMap::new()),
                events,
                wake: Notify::new(),
                permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
                tick: timing::scheduler_tick(),
                next_run_id: AtomicU64::new(1),
            }),
        }
    }

    /// Shared context
    pub fn context(&self) -> &Context {
        &self.shared.context
    }

    /// Store receiving the results
    pub fn results(&self) -> &Arc<ResultStore> {
        &self.shared.results
    }

    /// Receive task lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.shared.events.subscribe()
    }

    /// Add a task
    ///
    /// The options are parsed into the method's definition immediately, so a
    /// task with an unknown method or malformed options is rejected here.
    pub fn enqueue(&self, spec: TaskSpec) -> Result<(), SchedulerError> {
        let definition = self
            .shared
            .context
            .registry
            .create_measurement_definition(&spec.method, &spec.options)?;
        let now = self.shared.context.now();

        {
            let mut tasks = self.shared.tasks.lock().expect("mutex poisoned");
            if tasks.contains_key(&spec.task_id) {
                return Err(SchedulerError::DuplicateTask(spec.task_id));
            }
            if !spec.timing.is_valid() {
                debug!(task_id = %spec.task_id, timing = spec.timing.type_name(), "Timing is incomplete");
            }

            let task = ScheduledTask::new(spec, definition, now);
            info!(
                task_id = %task.spec.task_id,
                method = %task.spec.method,
                next_run = ?task.next_run,
                "Task scheduled"
            );
            tasks.insert(task.spec.task_id, task);
        }

        self.shared.wake.notify_one();
        Ok(())
    }

    /// Remove a task, cancelling it if it is running
    ///
    /// Reports already stored for the task are kept.
    pub fn remove_task(&self, task_id: TaskId) -> Result<TaskSpec, SchedulerError> {
        let task = self
            .shared
            .tasks
            .lock()
            .expect("mutex poisoned")
            .remove(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;

        if let Some(cancel) = &task.cancel {
            cancel.cancel();
        }
        self.shared.wake.notify_one();
        Ok(task.spec)
    }

    /// Cancel the running measurement of a task
    ///
    /// The run produces no result and the task returns to `Idle`. Returns
    /// whether a run was in progress.
    pub fn stop_task(&self, task_id: TaskId) -> Result<bool, SchedulerError> {
        let tasks = self.shared.tasks.lock().expect("mutex poisoned");
        let task = tasks
            .get(&task_id)
            .ok_or(SchedulerError::UnknownTask(task_id))?;
        match &task.cancel {
            Some(cancel) => {
                cancel.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// State of one task
    pub fn task_state(&self, task_id: TaskId) -> Option<TaskState> {
        self.shared
            .tasks
            .lock()
            .expect("mutex poisoned")
            .get(&task_id)
            .map(ScheduledTask::state)
    }

    /// State of every task, ordered by identity
    pub fn tasks(&self) -> Vec<TaskState> {
        self.shared
            .tasks
            .lock()
            .expect("mutex poisoned")
            .values()
            .map(ScheduledTask::state)
            .collect()
    }

    /// Earliest next run among tasks waiting to be dispatched
    pub fn next_due(&self) -> Option<NaiveDateTime> {
        self.shared
            .tasks
            .lock()
            .expect("mutex poisoned")
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Idle | TaskStatus::Finished))
            .filter_map(|t| t.next_run)
            .min()
    }

    /// Start every task that is due now
    ///
    /// Must be called from within a Tokio runtime. The returned handles
    /// complete when the respective runs have been recorded.
    pub fn dispatch_due(&self) -> Vec<JoinHandle<()>> {
        let now = self.shared.context.now();
        let mut jobs = Vec::new();

        {
            let mut tasks = self.shared.tasks.lock().expect("mutex poisoned");
            for task in tasks.values_mut().filter(|t| t.is_due(now)) {
                task.spec.timing.reset_at(now);
                task.status = TaskStatus::Running;
                task.last_error = None;
                let cancel = CancellationToken::new();
                task.cancel = Some(cancel.clone());
                task.run_id = self.shared.next_run_id.fetch_add(1, Ordering::Relaxed);

                info!(
                    task_id = %task.spec.task_id,
                    method = %task.spec.method,
                    run_id = task.run_id,
                    "Dispatching task"
                );
                jobs.push((task.spec.task_id, task.run_id, cancel));
            }
        }

        jobs.into_iter()
            .map(|(task_id, run_id, cancel)| {
                self.emit(SchedulerEvent::StatusChanged {
                    task_id,
                    status: TaskStatus::Running,
                });
                let shared = self.shared.clone();
                tokio::spawn(execute(shared, task_id, run_id, now, cancel))
            })
            .collect()
    }

    /// Dispatch every due task and wait until all of them have completed
    pub async fn run_pending(&self) -> usize {
        let jobs = self.dispatch_due();
        let count = jobs.len();
        for outcome in futures::future::join_all(jobs).await {
            if let Err(e) = outcome {
                warn!(error = %e, "Task job failed");
            }
        }
        count
    }

    /// Run the dispatch loop until `shutdown` is cancelled
    ///
    /// Running measurements are cancelled on shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(tick = ?self.shared.tick, "Scheduler started");

        loop {
            self.dispatch_due();

            let wait = match self.next_due() {
                Some(next) => (next - self.shared.context.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(self.shared.tick),
                None => self.shared.tick,
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.shared.wake.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let tasks = self.shared.tasks.lock().expect("mutex poisoned");
        for cancel in tasks.values().filter_map(|t| t.cancel.as_ref()) {
            cancel.cancel();
        }
        info!("Scheduler stopped");
    }

    fn emit(&self, event: SchedulerEvent) {
        let _ = self.shared.events.send(event);
    }
}

impl TaskLookup for Scheduler {
    fn task_by_task_id(&self, task_id: TaskId) -> Option<TaskSpec> {
        self.shared
            .tasks
            .lock()
            .expect("mutex poisoned")
            .get(&task_id)
            .map(|t| t.spec.clone())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.tasks())
            .field("tick", &self.shared.tick)
            .finish()
    }
}

/// Run one dispatched task and record the outcome
async fn execute(
    shared: Arc<Shared>,
    task_id: TaskId,
    run_id: u64,
    started_at: NaiveDateTime,
    cancel: CancellationToken,
) {
    let Ok(_permit) = shared.permits.clone().acquire_owned().await else {
        return;
    };

    let prepared = {
        let tasks = shared.tasks.lock().expect("mutex poisoned");
        tasks.get(&task_id).filter(|t| t.run_id == run_id).map(|task| {
            let env = MeasurementEnv {
                transport: shared.context.transport.clone(),
                cancel: cancel.clone(),
            };
            (
                shared
                    .context
                    .registry
                    .create_measurement(&task.spec.method, env),
                task.definition.clone(),
            )
        })
    };
    // Removed or replaced while waiting for a permit
    let Some((measurement, definition)) = prepared else {
        return;
    };

    let outcome = match measurement {
        _ if cancel.is_cancelled() => Err(MeasurementError::Cancelled),
        Ok(mut measurement) => tokio::task::spawn_blocking(move || {
            measurement.prepare(&definition)?;
            measurement.start()?;
            Ok::<_, MeasurementError>(measurement.result())
        })
        .await
        .unwrap_or_else(|e| {
            Err(MeasurementError::Config(format!(
                "measurement thread failed: {e}"
            )))
        }),
        Err(e) => Err(MeasurementError::Config(e.to_string())),
    };

    let (status, error, result) = match outcome {
        Ok(result) => (TaskStatus::Finished, None, result),
        Err(MeasurementError::Cancelled) => {
            info!(%task_id, "Task cancelled");
            (TaskStatus::Idle, None, None)
        }
        Err(e) => {
            warn!(%task_id, error = %e, "Task failed");
            (TaskStatus::Error, Some(e.to_string()), None)
        }
    };

    let now = shared.context.now();
    {
        let mut tasks = shared.tasks.lock().expect("mutex poisoned");
        let Some(task) = tasks.get_mut(&task_id).filter(|t| t.run_id == run_id) else {
            debug!(%task_id, run_id, "Discarding outcome of a stale run");
            return;
        };
        if let Some(result) = result {
            shared.results.record(task_id, started_at, result);
        }
        task.status = status;
        task.cancel = None;
        task.last_error = error.clone();
        task.next_run = match status {
            TaskStatus::Error => None,
            _ => task.spec.timing.next_run_from(now),
        };
        debug!(%task_id, ?status, next_run = ?task.next_run, "Task completed");
    }

    if let Some(message) = error {
        let _ = shared.events.send(SchedulerEvent::Error { task_id, message });
    }
    let _ = shared
        .events
        .send(SchedulerEvent::StatusChanged { task_id, status });
    shared.wake.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::result::{MeasurementResult, ResultEvent};
    use crate::socket::{ScriptedReply, ScriptedTransport, SocketSpec};
    use crate::timing::{CalendarTiming, ImmediateTiming, PeriodicTiming, Timing};
    use chrono::{NaiveDate, TimeDelta};
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn destination(_: &SocketSpec) -> ScriptedReply {
        ScriptedReply::Unreachable {
            from: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            rtt_us: 1200,
        }
    }

    fn scheduler(clock: Arc<ManualClock>, transport: ScriptedTransport) -> Scheduler {
        let context = Context::new(clock, Arc::new(transport));
        Scheduler::new(context, Arc::new(ResultStore::new(10)), 2)
    }

    fn ping_task(id: u64, timing: Timing) -> TaskSpec {
        TaskSpec {
            task_id: TaskId(id),
            method: "udpping".to_string(),
            options: json!({
                "host": "192.0.2.1",
                "count": 2,
                "interval": 0,
                "receive_timeout": 50
            }),
            timing,
        }
    }

    #[tokio::test]
    async fn test_immediate_task_runs_once() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let scheduler = scheduler(clock.clone(), ScriptedTransport::new(destination));
        let mut results = scheduler.results().subscribe();

        scheduler
            .enqueue(ping_task(1, Timing::Immediate(ImmediateTiming::new())))
            .unwrap();
        assert_eq!(scheduler.next_due(), Some(at(8, 0, 0)));

        assert_eq!(scheduler.run_pending().await, 1);

        let state = scheduler.task_state(TaskId(1)).unwrap();
        assert_eq!(state.status, TaskStatus::Finished);
        assert_eq!(state.next_run, None);

        let event = results.try_recv().unwrap();
        assert!(matches!(event, ResultEvent::Added { position: 0, .. }));
        assert_eq!(event.report().report_time, at(8, 0, 0));
        let MeasurementResult::Ping(report) = &event.report().results[0] else {
            panic!("expected ping result");
        };
        assert_eq!(report.rtts, vec![1200, 1200]);

        clock.advance(TimeDelta::hours(1));
        assert_eq!(scheduler.run_pending().await, 0);
    }

    #[tokio::test]
    async fn test_recurring_task_modifies_report() {
        let clock = Arc::new(ManualClock::new(at(8, 59, 0)));
        let scheduler = scheduler(clock.clone(), ScriptedTransport::new(destination));
        let mut results = scheduler.results().subscribe();

        let timing = CalendarTiming::builder()
            .minutes([0, 30])
            .seconds([0])
            .build();
        scheduler.enqueue(ping_task(5, Timing::Calendar(timing))).unwrap();
        assert_eq!(scheduler.next_due(), Some(at(9, 0, 0)));

        // Not due yet
        assert_eq!(scheduler.run_pending().await, 0);

        clock.set(at(9, 0, 0));
        assert_eq!(scheduler.run_pending().await, 1);
        assert_eq!(
            scheduler.task_state(TaskId(5)).unwrap().next_run,
            Some(at(9, 30, 0))
        );
        // Same instant again: the watermark prevents a second run
        assert_eq!(scheduler.run_pending().await, 0);

        clock.set(at(9, 30, 0));
        assert_eq!(scheduler.run_pending().await, 1);

        assert!(matches!(results.try_recv().unwrap(), ResultEvent::Added { .. }));
        let modified = results.try_recv().unwrap();
        assert!(matches!(modified, ResultEvent::Modified { .. }));
        assert_eq!(modified.report().results.len(), 2);
        assert_eq!(modified.report().report_time, at(9, 30, 0));
    }

    #[tokio::test]
    async fn test_failed_prepare_is_final() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let transport = ScriptedTransport::new(destination);
        let scheduler = scheduler(clock.clone(), transport.clone());
        let mut events = scheduler.subscribe();

        let spec = TaskSpec {
            task_id: TaskId(9),
            method: "traceroute".to_string(),
            options: json!({"host": "192.0.2.1", "type": "tcp"}),
            timing: Timing::Periodic(PeriodicTiming::new(1000)),
        };
        scheduler.enqueue(spec).unwrap();
        scheduler.run_pending().await;

        let state = scheduler.task_state(TaskId(9)).unwrap();
        assert_eq!(state.status, TaskStatus::Error);
        assert!(state.last_error.unwrap().contains("TCP"));
        assert_eq!(state.next_run, None);
        assert!(scheduler.results().is_empty());
        assert_eq!(transport.opened(), 0);

        assert_eq!(
            events.try_recv().unwrap(),
            SchedulerEvent::StatusChanged {
                task_id: TaskId(9),
                status: TaskStatus::Running
            }
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            SchedulerEvent::Error { task_id: TaskId(9), .. }
        ));

        // Not retried
        clock.advance(TimeDelta::minutes(5));
        assert_eq!(scheduler.run_pending().await, 0);
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let scheduler = scheduler(clock, ScriptedTransport::new(destination));

        scheduler
            .enqueue(TaskSpec {
                task_id: TaskId(1),
                method: "snmp".to_string(),
                options: json!({"host_addresses": "10.0.0.1", "snmp_version": 3}),
                timing: Timing::Immediate(ImmediateTiming::new()),
            })
            .unwrap();
        scheduler
            .enqueue(ping_task(2, Timing::Immediate(ImmediateTiming::new())))
            .unwrap();

        assert_eq!(scheduler.run_pending().await, 2);
        assert_eq!(
            scheduler.task_state(TaskId(1)).unwrap().status,
            TaskStatus::Error
        );
        assert_eq!(
            scheduler.task_state(TaskId(2)).unwrap().status,
            TaskStatus::Finished
        );
        assert!(scheduler.results().report(TaskId(2)).is_some());
    }

    #[tokio::test]
    async fn test_enqueue_errors() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let scheduler = scheduler(clock, ScriptedTransport::new(destination));

        let mut spec = ping_task(1, Timing::Immediate(ImmediateTiming::new()));
        scheduler.enqueue(spec.clone()).unwrap();
        assert!(matches!(
            scheduler.enqueue(spec.clone()),
            Err(SchedulerError::DuplicateTask(TaskId(1)))
        ));

        spec.task_id = TaskId(2);
        spec.method = "http".to_string();
        assert!(matches!(
            scheduler.enqueue(spec.clone()),
            Err(SchedulerError::Definition(DefinitionError::UnknownMethod(_)))
        ));

        spec.method = "udpping".to_string();
        spec.options = json!({"count": 1});
        assert!(matches!(
            scheduler.enqueue(spec),
            Err(SchedulerError::Definition(DefinitionError::InvalidOptions { .. }))
        ));

        assert!(matches!(
            scheduler.remove_task(TaskId(7)),
            Err(SchedulerError::UnknownTask(TaskId(7)))
        ));
        assert!(matches!(
            scheduler.stop_task(TaskId(7)),
            Err(SchedulerError::UnknownTask(TaskId(7)))
        ));
        assert_eq!(scheduler.tasks().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_running_task() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let scheduler = scheduler(clock, ScriptedTransport::new(|_| ScriptedReply::Silence));

        let mut spec = ping_task(3, Timing::Periodic(PeriodicTiming::new(60_000)));
        spec.options = json!({"host": "192.0.2.1", "count": 100, "receive_timeout": 10000});
        scheduler.enqueue(spec).unwrap();

        let jobs = scheduler.dispatch_due();
        assert_eq!(jobs.len(), 1);
        assert_eq!(
            scheduler.task_state(TaskId(3)).unwrap().status,
            TaskStatus::Running
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.stop_task(TaskId(3)).unwrap());
        futures::future::join_all(jobs).await;

        let state = scheduler.task_state(TaskId(3)).unwrap();
        assert_eq!(state.status, TaskStatus::Idle);
        assert_eq!(state.next_run, Some(at(8, 1, 0)));
        assert!(scheduler.results().is_empty());
        assert!(!scheduler.stop_task(TaskId(3)).unwrap());
    }

    #[tokio::test]
    async fn test_replaced_task_ignores_old_run() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let transport = ScriptedTransport::new(|_| ScriptedReply::Silence);
        let scheduler = scheduler(clock, transport.clone());

        let mut spec = ping_task(6, Timing::Periodic(PeriodicTiming::new(60_000)));
        spec.options = json!({"host": "192.0.2.1", "count": 100, "receive_timeout": 10000});
        scheduler.enqueue(spec.clone()).unwrap();
        let old_jobs = scheduler.dispatch_due();
        tokio::time::sleep(Duration::from_millis(50)).await;

        scheduler.remove_task(TaskId(6)).unwrap();
        scheduler.enqueue(spec).unwrap();
        let new_jobs = scheduler.dispatch_due();
        assert_eq!(new_jobs.len(), 1);

        futures::future::join_all(old_jobs).await;
        let state = scheduler.task_state(TaskId(6)).unwrap();
        assert_eq!(state.status, TaskStatus::Running);
        assert!(scheduler.stop_task(TaskId(6)).unwrap());

        futures::future::join_all(new_jobs).await;
        let state = scheduler.task_state(TaskId(6)).unwrap();
        assert_eq!(state.status, TaskStatus::Idle);
        assert!(scheduler.results().is_empty());
        assert_eq!(transport.opened(), transport.closed());
    }

    #[tokio::test]
    async fn test_stop_before_start_opens_nothing() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let transport = ScriptedTransport::new(destination);
        let scheduler = scheduler(clock, transport.clone());
        scheduler
            .enqueue(ping_task(8, Timing::Periodic(PeriodicTiming::new(60_000))))
            .unwrap();

        let jobs = scheduler.dispatch_due();
        assert!(scheduler.stop_task(TaskId(8)).unwrap());
        futures::future::join_all(jobs).await;

        let state = scheduler.task_state(TaskId(8)).unwrap();
        assert_eq!(state.status, TaskStatus::Idle);
        assert_eq!(state.next_run, Some(at(8, 1, 0)));
        assert_eq!(transport.opened(), 0);
        assert!(scheduler.results().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_interval_never_dispatches() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let transport = ScriptedTransport::new(destination);
        let scheduler = scheduler(clock, transport.clone());

        let timing = PeriodicTiming::new(10_000_000_000_000_000).with_window(Some(at(8, 0, 0)), None);
        scheduler.enqueue(ping_task(2, Timing::Periodic(timing))).unwrap();

        assert_eq!(scheduler.task_state(TaskId(2)).unwrap().next_run, None);
        assert_eq!(scheduler.run_pending().await, 0);
        assert_eq!(transport.opened(), 0);
    }

    #[tokio::test]
    async fn test_lookup_and_rows() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let scheduler = scheduler(clock, ScriptedTransport::new(destination));
        scheduler
            .enqueue(ping_task(4, Timing::Immediate(ImmediateTiming::new())))
            .unwrap();
        scheduler.run_pending().await;

        let rows = scheduler.results().rows(&scheduler);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].method, "UDPPING");
        assert_eq!(rows[0].target, "192.0.2.1");

        let removed = scheduler.remove_task(TaskId(4)).unwrap();
        assert_eq!(removed.task_id, TaskId(4));
        assert!(scheduler.task_by_task_id(TaskId(4)).is_none());
        assert_eq!(scheduler.results().len(), 1);
    }

    #[tokio::test]
    async fn test_run_loop_until_shutdown() {
        let clock = Arc::new(ManualClock::new(at(8, 0, 0)));
        let scheduler = scheduler(clock, ScriptedTransport::new(destination));
        let mut results = scheduler.results().subscribe();

        let shutdown = CancellationToken::new();
        let runner = {
            let scheduler = scheduler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { scheduler.run(shutdown).await })
        };

        scheduler
            .enqueue(ping_task(1, Timing::Immediate(ImmediateTiming::new())))
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), results.recv())
            .await
            .expect("result in time")
            .unwrap();
        assert_eq!(event.task_id(), TaskId(1));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .expect("loop stops")
            .unwrap();
    }
}
