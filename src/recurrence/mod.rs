//! Next-occurrence arithmetic for repeating todos.
//!
//! Month and year steps clamp the day of month to the last day of the target
//! month: 2024-01-31 plus one month is 2024-02-29, never a date in March.

use std::fmt;

use chrono::{DateTime, Days, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TodoSyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrenceUnit {
    Day,
    Week,
    Month,
    Year,
}

impl RecurrenceUnit {
    /// Case-insensitive; accepts singular and plural forms.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "day" | "days" => Some(Self::Day),
            "week" | "weeks" => Some(Self::Week),
            "month" | "months" => Some(Self::Month),
            "year" | "years" => Some(Self::Year),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
        }
    }

    /// `base` moved forward by `count` units, or `None` on overflow.
    pub fn advance<Tz: TimeZone>(self, base: DateTime<Tz>, count: u32) -> Option<DateTime<Tz>> {
        match self {
            Self::Day => base.checked_add_days(Days::new(u64::from(count))),
            Self::Week => base.checked_add_days(Days::new(7 * u64::from(count))),
            Self::Month => base.checked_add_months(Months::new(count)),
            Self::Year => base.checked_add_months(Months::new(count.checked_mul(12)?)),
        }
    }
}

impl fmt::Display for RecurrenceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated repeat rule: both parts present, interval between 1 and the
/// largest value the `recurrence_interval` column holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recurrence {
    interval: u32,
    unit: RecurrenceUnit,
}

impl Recurrence {
    pub const MAX_INTERVAL: u32 = i32::MAX as u32;

    pub fn new(interval: u32, unit: RecurrenceUnit) -> Result<Self> {
        if interval == 0 {
            return Err(TodoSyncError::Validation(
                "recurrence interval must be at least 1".to_string(),
            ));
        }
        if interval > Self::MAX_INTERVAL {
            return Err(TodoSyncError::Validation(format!(
                "recurrence interval {interval} is out of range"
            )));
        }
        Ok(Self { interval, unit })
    }

    /// Build from request fields. Both absent means "no recurrence".
    pub fn from_parts(interval: Option<i64>, unit: Option<&str>) -> Result<Option<Self>> {
        match (interval, unit) {
            (None, None) => Ok(None),
            (Some(interval), Some(unit)) => {
                let unit = RecurrenceUnit::parse(unit).ok_or_else(|| {
                    TodoSyncError::Validation(format!(
                        "unknown recurrence unit '{unit}', expected day, week, month or year"
                    ))
                })?;
                let interval = i32::try_from(interval)
                    .ok()
                    .and_then(|interval| u32::try_from(interval).ok())
                    .ok_or_else(|| {
                        TodoSyncError::Validation(format!(
                            "recurrence interval {interval} is out of range"
                        ))
                    })?;
                Self::new(interval, unit).map(Some)
            }
            _ => Err(TodoSyncError::Validation(
                "recurrence interval and unit must be given together".to_string(),
            )),
        }
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn unit(&self) -> RecurrenceUnit {
        self.unit
    }

    /// The interval as stored in the `recurrence_interval` column.
    pub(crate) fn stored_interval(&self) -> i32 {
        i32::try_from(self.interval).unwrap_or(i32::MAX)
    }

    pub fn next_after(&self, base_due: DateTime<Utc>) -> Option<DateTime<Utc>> {
        next_due(base_due, self.interval, self.unit.as_str())
    }
}

/// The due date following `base_due`, keeping its time of day.
///
/// `unit` is the stored text form. An unrecognised unit yields `None` and the
/// repeat silently does not fire.
pub fn next_due(base_due: DateTime<Utc>, interval: u32, unit: &str) -> Option<DateTime<Utc>> {
    let unit = RecurrenceUnit::parse(unit)?;
    let next = unit.advance(base_due, interval)?;
    Some(next.date_naive().and_time(base_due.time()).and_utc())
}
