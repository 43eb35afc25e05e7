//! When a task runs
//!
//! Every timing answers the same two questions: when is the next run after a
//! given instant, and has the schedule been exhausted. The last accepted
//! execution is kept as a watermark so one instant is never fired twice.

mod calendar;

pub use calendar::{CalendarTiming, CalendarTimingBuilder, LOOKAHEAD_YEARS};

use crate::clock::NetworkClock;
use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

/// Longest accepted periodic interval, roughly ten years
pub const MAX_PERIODIC_INTERVAL_MS: u64 = 315_576_000_000;

/// Schedule attached to a task
///
/// Serialized as a single-key map naming the variant, e.g.
/// `{"calendar": {...}}` or `{"periodic": {"interval": 60000}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timing {
    /// Run once, as soon as possible
    Immediate(ImmediateTiming),
    /// Run at a fixed interval
    Periodic(PeriodicTiming),
    /// Run at calendar matches
    Calendar(CalendarTiming),
}

impl Timing {
    /// Short name of the variant
    pub fn type_name(&self) -> &'static str {
        match self {
            Timing::Immediate(_) => "immediate",
            Timing::Periodic(_) => "periodic",
            Timing::Calendar(_) => "calendar",
        }
    }

    /// Whether the schedule is complete enough to run
    pub fn is_valid(&self) -> bool {
        match self {
            Timing::Immediate(_) => true,
            Timing::Periodic(t) => t.is_valid(),
            Timing::Calendar(t) => t.is_valid(),
        }
    }

    /// Record `now` as the last execution; returns whether another run follows
    pub fn reset_at(&mut self, now: NaiveDateTime) -> bool {
        match self {
            Timing::Immediate(t) => t.reset_at(now),
            Timing::Periodic(t) => t.reset_at(now),
            Timing::Calendar(t) => t.reset_at(now),
        }
    }

    /// Record `clock`'s current time as the last execution
    pub fn reset(&mut self, clock: &dyn NetworkClock) -> bool {
        self.reset_at(clock.current_date_time())
    }

    /// Next run at or after `reference`, `None` once exhausted
    pub fn next_run_from(&self, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Timing::Immediate(t) => t.next_run_from(reference),
            Timing::Periodic(t) => t.next_run_from(reference),
            Timing::Calendar(t) => t.next_run_from(reference),
        }
    }

    /// Next run after `clock`'s current time
    pub fn next_run(&self, clock: &dyn NetworkClock) -> Option<NaiveDateTime> {
        self.next_run_from(clock.current_date_time())
    }

    /// Last accepted execution
    pub fn last_execution(&self) -> Option<NaiveDateTime> {
        match self {
            Timing::Immediate(t) => t.last_execution,
            Timing::Periodic(t) => t.last_execution,
            Timing::Calendar(t) => t.last_execution(),
        }
    }
}

impl From<ImmediateTiming> for Timing {
    fn from(t: ImmediateTiming) -> Self {
        Timing::Immediate(t)
    }
}

impl From<PeriodicTiming> for Timing {
    fn from(t: PeriodicTiming) -> Self {
        Timing::Periodic(t)
    }
}

impl From<CalendarTiming> for Timing {
    fn from(t: CalendarTiming) -> Self {
        Timing::Calendar(t)
    }
}

/// Single run at the first opportunity
///
/// The watermark is runtime state: it is neither serialized nor compared.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImmediateTiming {
    #[serde(skip)]
    last_execution: Option<NaiveDateTime>,
}

impl PartialEq for ImmediateTiming {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for ImmediateTiming {}

impl ImmediateTiming {
    /// Create an immediate timing that has not run yet
    pub fn new() -> Self {
        Self::default()
    }

    fn reset_at(&mut self, now: NaiveDateTime) -> bool {
        self.last_execution = Some(now);
        false
    }

    fn next_run_from(&self, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        match self.last_execution {
            None => Some(reference),
            Some(_) => None,
        }
    }
}

/// Fixed-interval repetition
///
/// Runs are anchored at `start` when given, otherwise at the last execution,
/// so the grid does not drift with scheduler latency. Equality ignores the
/// watermark, which is not serialized either.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeriodicTiming {
    /// First allowed run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDateTime>,
    /// Last allowed run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDateTime>,
    /// Interval between runs in milliseconds
    #[serde(rename = "interval")]
    pub interval_ms: u64,
    #[serde(skip)]
    last_execution: Option<NaiveDateTime>,
}

impl PartialEq for PeriodicTiming {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end && self.interval_ms == other.interval_ms
    }
}

impl Eq for PeriodicTiming {}

impl PeriodicTiming {
    /// Create an unbounded periodic timing
    pub fn new(interval_ms: u64) -> Self {
        Self {
            start: None,
            end: None,
            interval_ms,
            last_execution: None,
        }
    }

    /// Restrict the timing to a window
    pub fn with_window(mut self, start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Non-zero interval of at most [`MAX_PERIODIC_INTERVAL_MS`] and a window
    /// that is not inverted
    pub fn is_valid(&self) -> bool {
        let ordered = match (self.start, self.end) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        };
        let stepping = match (self.step(), self.start) {
            (Some(step), Some(start)) => start.checked_add_signed(step).is_some(),
            (Some(_), None) => true,
            (None, _) => false,
        };
        stepping && ordered
    }

    fn step(&self) -> Option<TimeDelta> {
        if self.interval_ms == 0 || self.interval_ms > MAX_PERIODIC_INTERVAL_MS {
            return None;
        }
        TimeDelta::try_milliseconds(i64::try_from(self.interval_ms).ok()?)
    }

    fn reset_at(&mut self, now: NaiveDateTime) -> bool {
        self.last_execution = Some(now);
        self.next_run_from(now).is_some()
    }

    /// A grid point past the representable date range exhausts the timing
    fn next_run_from(&self, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        let step = self.step()?;
        let step_ms = step.num_milliseconds();

        let Some(anchor) = self.start.or(self.last_execution) else {
            return Some(reference);
        };

        let mut next = anchor;
        if reference > anchor {
            let elapsed = (reference - anchor).num_milliseconds();
            let steps = elapsed.div_euclid(step_ms) + i64::from(elapsed.rem_euclid(step_ms) != 0);
            let offset = TimeDelta::try_milliseconds(steps.checked_mul(step_ms)?)?;
            next = anchor.checked_add_signed(offset)?;
        }

        if let Some(watermark) = self.last_execution {
            while next - watermark <= TimeDelta::seconds(1) {
                next = next.checked_add_signed(step)?;
            }
        }

        match self.end {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }
}
