//! Calendar-based recurrence
//!
//! A [`CalendarTiming`] holds six sorted value sets (months, days of week,
//! days of month, hours, minutes, seconds) and an optional validity window.
//! [`CalendarTiming::next_run_from`] searches the calendar for the earliest
//! instant matching every set instead of stepping through time second by
//! second.

use crate::clock::NetworkClock;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Years searched past the reference year before giving up
pub const LOOKAHEAD_YEARS: i32 = 2;

const MONTHS: RangeInclusive<u32> = 1..=12;
const DAYS_OF_WEEK: RangeInclusive<u32> = 1..=7;
const DAYS_OF_MONTH: RangeInclusive<u32> = 1..=31;
const HOURS: RangeInclusive<u32> = 0..=23;
const MINUTES: RangeInclusive<u32> = 0..=59;
const SECONDS: RangeInclusive<u32> = 0..=59;

/// Schedule defined by calendar field sets
///
/// Days of week are numbered 1 (Monday) to 7 (Sunday). An empty set means the
/// schedule never fires. Values outside a field's range are dropped.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use mprobe::timing::CalendarTiming;
///
/// // Every Monday at 09:30:00
/// let timing = CalendarTiming::builder()
///     .days_of_week([1])
///     .hours([9])
///     .minutes([30])
///     .seconds([0])
///     .build();
///
/// let reference = NaiveDate::from_ymd_opt(2024, 1, 3)
///     .unwrap()
///     .and_hms_opt(12, 0, 0)
///     .unwrap();
/// let next = timing.next_run_from(reference).unwrap();
/// assert_eq!(next.to_string(), "2024-01-08 09:30:00");
/// ```
///
/// The watermark is runtime state: it is neither serialized nor compared.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "CalendarFields", into = "CalendarFields")]
pub struct CalendarTiming {
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    days_of_month: Vec<u32>,
    hours: Vec<u32>,
    minutes: Vec<u32>,
    seconds: Vec<u32>,
    last_execution: Option<NaiveDateTime>,
}

impl PartialEq for CalendarTiming {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.months == other.months
            && self.days_of_week == other.days_of_week
            && self.days_of_month == other.days_of_month
            && self.hours == other.hours
            && self.minutes == other.minutes
            && self.seconds == other.seconds
    }
}

impl Eq for CalendarTiming {}

/// Wire form of a calendar schedule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CalendarFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    end: Option<NaiveDateTime>,
    #[serde(default)]
    months: Vec<u32>,
    #[serde(default)]
    days_of_week: Vec<u32>,
    #[serde(default)]
    days_of_month: Vec<u32>,
    #[serde(default)]
    hours: Vec<u32>,
    #[serde(default)]
    minutes: Vec<u32>,
    #[serde(default)]
    seconds: Vec<u32>,
}

impl From<CalendarFields> for CalendarTiming {
    fn from(f: CalendarFields) -> Self {
        CalendarTiming::new(
            f.start,
            f.end,
            f.months,
            f.days_of_week,
            f.days_of_month,
            f.hours,
            f.minutes,
            f.seconds,
        )
    }
}

impl From<CalendarTiming> for CalendarFields {
    fn from(t: CalendarTiming) -> Self {
        CalendarFields {
            start: t.start,
            end: t.end,
            months: t.months,
            days_of_week: t.days_of_week,
            days_of_month: t.days_of_month,
            hours: t.hours,
            minutes: t.minutes,
            seconds: t.seconds,
        }
    }
}

fn normalize(mut values: Vec<u32>, range: &RangeInclusive<u32>) -> Vec<u32> {
    values.retain(|v| range.contains(v));
    values.sort_unstable();
    values.dedup();
    values
}

/// Round up to the next whole second
fn ceil_to_second(t: NaiveDateTime) -> NaiveDateTime {
    let whole = t.with_nanosecond(0).unwrap_or(t);
    if whole < t {
        whole + TimeDelta::seconds(1)
    } else {
        whole
    }
}

impl CalendarTiming {
    /// Every month
    pub const ALL_MONTHS: RangeInclusive<u32> = MONTHS;
    /// Every day of the week
    pub const ALL_DAYS_OF_WEEK: RangeInclusive<u32> = DAYS_OF_WEEK;
    /// Every day of the month
    pub const ALL_DAYS_OF_MONTH: RangeInclusive<u32> = DAYS_OF_MONTH;
    /// Every hour
    pub const ALL_HOURS: RangeInclusive<u32> = HOURS;
    /// Every minute
    pub const ALL_MINUTES: RangeInclusive<u32> = MINUTES;
    /// Every second
    pub const ALL_SECONDS: RangeInclusive<u32> = SECONDS;

    /// Create a calendar schedule; the sets are sorted and deduplicated
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
        months: Vec<u32>,
        days_of_week: Vec<u32>,
        days_of_month: Vec<u32>,
        hours: Vec<u32>,
        minutes: Vec<u32>,
        seconds: Vec<u32>,
    ) -> Self {
        Self {
            start,
            end,
            months: normalize(months, &MONTHS),
            days_of_week: normalize(days_of_week, &DAYS_OF_WEEK),
            days_of_month: normalize(days_of_month, &DAYS_OF_MONTH),
            hours: normalize(hours, &HOURS),
            minutes: normalize(minutes, &MINUTES),
            seconds: normalize(seconds, &SECONDS),
            last_execution: None,
        }
    }

    /// Builder with every field set to its full range
    pub fn builder() -> CalendarTimingBuilder {
        CalendarTimingBuilder::new()
    }

    /// Start of the validity window
    pub fn start(&self) -> Option<NaiveDateTime> {
        self.start
    }

    /// End of the validity window
    pub fn end(&self) -> Option<NaiveDateTime> {
        self.end
    }

    /// Allowed months (1-12)
    pub fn months(&self) -> &[u32] {
        &self.months
    }

    /// Allowed days of week (1 = Monday, 7 = Sunday)
    pub fn days_of_week(&self) -> &[u32] {
        &self.days_of_week
    }

    /// Allowed days of month (1-31)
    pub fn days_of_month(&self) -> &[u32] {
        &self.days_of_month
    }

    /// Allowed hours (0-23)
    pub fn hours(&self) -> &[u32] {
        &self.hours
    }

    /// Allowed minutes (0-59)
    pub fn minutes(&self) -> &[u32] {
        &self.minutes
    }

    /// Allowed seconds (0-59)
    pub fn seconds(&self) -> &[u32] {
        &self.seconds
    }

    /// Last accepted execution time
    pub fn last_execution(&self) -> Option<NaiveDateTime> {
        self.last_execution
    }

    /// Every set is non-empty and both window bounds are present
    pub fn is_valid(&self) -> bool {
        self.start.is_some() && self.end.is_some() && !self.has_empty_field()
    }

    fn has_empty_field(&self) -> bool {
        self.months.is_empty()
            || self.days_of_week.is_empty()
            || self.days_of_month.is_empty()
            || self.hours.is_empty()
            || self.minutes.is_empty()
            || self.seconds.is_empty()
    }

    /// Record `clock`'s current time as the last execution
    ///
    /// Returns whether another run exists after that point.
    pub fn reset(&mut self, clock: &dyn NetworkClock) -> bool {
        self.reset_at(clock.current_date_time())
    }

    /// Record `now` as the last execution
    pub fn reset_at(&mut self, now: NaiveDateTime) -> bool {
        self.last_execution = Some(now);
        self.next_run_from(now).is_some()
    }

    /// Next run after `clock`'s current time
    pub fn next_run(&self, clock: &dyn NetworkClock) -> Option<NaiveDateTime> {
        self.next_run_from(clock.current_date_time())
    }

    /// Earliest matching instant at or after `reference` and `start`
    ///
    /// Returns `None` when nothing matches within the lookahead window, when
    /// the match lies past `end`, or when a field set is empty. A match within
    /// one second of the last execution is skipped.
    pub fn next_run_from(&self, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.has_empty_field() {
            return None;
        }

        let mut from = ceil_to_second(reference);
        if let Some(start) = self.start {
            if start > from {
                from = ceil_to_second(start);
            }
        }
        let last_year = from.year() + LOOKAHEAD_YEARS;

        let mut next = self.earliest_from(from, last_year)?;

        if let Some(watermark) = self.last_execution {
            if next - watermark <= TimeDelta::seconds(1) {
                let watermark = watermark.with_nanosecond(0).unwrap_or(watermark);
                next = self.earliest_from(watermark + TimeDelta::seconds(2), last_year)?;
            }
        }

        match self.end {
            Some(end) if next > end => None,
            _ => Some(next),
        }
    }

    fn earliest_from(&self, from: NaiveDateTime, last_year: i32) -> Option<NaiveDateTime> {
        let from_date = from.date();

        for year in from_date.year()..=last_year {
            for &month in &self.months {
                if (year, month) < (from_date.year(), from_date.month()) {
                    continue;
                }

                for &day in &self.days_of_month {
                    // Skips days the month does not have, e.g. 30 February
                    let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
                        continue;
                    };
                    if date < from_date
                        || !self
                            .days_of_week
                            .contains(&date.weekday().number_from_monday())
                    {
                        continue;
                    }

                    if date != from_date {
                        // A later day starts at the earliest allowed time
                        return date.and_hms_opt(self.hours[0], self.minutes[0], self.seconds[0]);
                    }
                    if let Some(time) = self.find_time(from.time()) {
                        return Some(date.and_time(time));
                    }
                }
            }
        }

        None
    }

    /// First allowed time of day at or after `reference`
    ///
    /// A minute below the reference only counts once the hour has carried
    /// past the reference hour; likewise for seconds within the minute.
    fn find_time(&self, reference: NaiveTime) -> Option<NaiveTime> {
        for &hour in self.hours.iter().filter(|&&h| h >= reference.hour()) {
            let hour_carried = hour > reference.hour();

            for &minute in &self.minutes {
                if !hour_carried && minute < reference.minute() {
                    continue;
                }
                let minute_carried = hour_carried || minute > reference.minute();

                for &second in &self.seconds {
                    if !minute_carried && second < reference.second() {
                        continue;
                    }
                    return NaiveTime::from_hms_opt(hour, minute, second);
                }
            }
        }

        None
    }
}

/// Builder for [`CalendarTiming`]
///
/// Unset fields default to their full range and the window to unbounded.
#[derive(Debug, Clone)]
pub struct CalendarTimingBuilder {
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    days_of_month: Vec<u32>,
    hours: Vec<u32>,
    minutes: Vec<u32>,
    seconds: Vec<u32>,
}

impl CalendarTimingBuilder {
    /// Create a builder matching every second
    pub fn new() -> Self {
        Self {
            start: None,
            end: None,
            months: MONTHS.collect(),
            days_of_week: DAYS_OF_WEEK.collect(),
            days_of_month: DAYS_OF_MONTH.collect(),
            hours: HOURS.collect(),
            minutes: MINUTES.collect(),
            seconds: SECONDS.collect(),
        }
    }

    /// Set the start of the validity window
    pub fn start(mut self, start: NaiveDateTime) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the end of the validity window
    pub fn end(mut self, end: NaiveDateTime) -> Self {
        self.end = Some(end);
        self
    }

    /// Set the allowed months
    pub fn months(mut self, months: impl IntoIterator<Item = u32>) -> Self {
        self.months = months.into_iter().collect();
        self
    }

    /// Set the allowed days of week
    pub fn days_of_week(mut self, days: impl IntoIterator<Item = u32>) -> Self {
        self.days_of_week = days.into_iter().collect();
        self
    }

    /// Set the allowed days of month
    pub fn days_of_month(mut self, days: impl IntoIterator<Item = u32>) -> Self {
        self.days_of_month = days.into_iter().collect();
        self
    }

    /// Set the allowed hours
    pub fn hours(mut self, hours: impl IntoIterator<Item = u32>) -> Self {
        self.hours = hours.into_iter().collect();
        self
    }

    /// Set the allowed minutes
    pub fn minutes(mut self, minutes: impl IntoIterator<Item = u32>) -> Self {
        self.minutes = minutes.into_iter().collect();
        self
    }

    /// Set the allowed seconds
    pub fn seconds(mut self, seconds: impl IntoIterator<Item = u32>) -> Self {
        self.seconds = seconds.into_iter().collect();
        self
    }

    /// Build the schedule
    pub fn build(self) -> CalendarTiming {
        CalendarTiming::new(
            self.start,
            self.end,
            self.months,
            self.days_of_week,
            self.days_of_month,
            self.hours,
            self.minutes,
            self.seconds,
        )
    }
}

impl Default for CalendarTimingBuilder {
    fn default() -> Self {
        Self::new()
    }
}
