//! Five-field crontab expressions.
//!
//! Grammar: `minute hour day-of-month month day-of-week`. Every field accepts
//! `*`, `N`, `A-B`, `*/S`, `A-B/S`, `N/S` and comma separated lists of those.
//! Months accept `jan`..`dec` and weekdays `sun`..`sat`; weekday `7` is Sunday.
//! When both day fields are restricted a day matches if either one does.
//!
//! All evaluation happens in UTC at minute resolution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use thiserror::Error;

/// How far ahead [`CronSchedule::next_after`] searches before giving up.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

/// Errors produced while parsing a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields (minute hour day-of-month month day-of-week), got {0}")]
    FieldCount(usize),

    #[error("{field}: invalid value `{value}`")]
    InvalidValue { field: &'static str, value: String },

    #[error("{field}: {value} is outside {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field}: step must be greater than zero")]
    ZeroStep { field: &'static str },

    #[error("{field}: range {start}-{end} is reversed")]
    ReversedRange {
        field: &'static str,
        start: u32,
        end: u32,
    },
}

#[derive(Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value of the first entry in `names`.
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    names_base: 0,
};

const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    names_base: 0,
};

const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    names_base: 0,
};

const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &[
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ],
    names_base: 1,
};

const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
    names_base: 0,
};

/// Bitset of the values a field accepts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn insert(&mut self, value: u32) {
        self.0 |= 1 << value;
    }

    fn contains(self, value: u32) -> bool {
        self.0 & (1 << value) != 0
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: FieldSet,
    hours: FieldSet,
    days_of_month: FieldSet,
    months: FieldSet,
    days_of_week: FieldSet,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a 5-field crontab expression.
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields[..] else {
            return Err(CronError::FieldCount(fields.len()));
        };

        let mut days_of_week = parse_field(dow, DAY_OF_WEEK)?;
        if days_of_week.contains(7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes: parse_field(minute, MINUTE)?,
            hours: parse_field(hour, HOUR)?,
            days_of_month: parse_field(dom, DAY_OF_MONTH)?,
            months: parse_field(month, MONTH)?,
            days_of_week,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
        })
    }

    /// The normalized expression text.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the minute containing `at` matches this schedule.
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let at = at.naive_utc();
        self.months.contains(at.month())
            && self.day_matches(at.date())
            && self.hours.contains(at.hour())
            && self.minutes.contains(at.minute())
    }

    /// The earliest minute-aligned instant strictly after `after` that matches.
    ///
    /// Returns `None` when nothing matches within five years, which only
    /// happens for impossible dates such as `0 0 31 2 *`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let after = after.naive_utc();
        let mut t = truncate_to_minute(after)? + Duration::minutes(1);
        let horizon = t + Duration::days(SEARCH_HORIZON_DAYS);

        while t <= horizon {
            if !self.months.contains(t.month()) {
                t = first_of_next_month(t.date())?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.contains(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(Utc.from_utc_datetime(&t));
        }

        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_field(field: &str, spec: FieldSpec) -> Result<FieldSet, CronError> {
    let mut set = FieldSet::default();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid(spec, part))?;
                if step == 0 {
                    return Err(CronError::ZeroStep { field: spec.name });
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((start, end)) = range.split_once('-') {
            let start = parse_value(start, spec)?;
            let end = parse_value(end, spec)?;
            if start > end {
                return Err(CronError::ReversedRange {
                    field: spec.name,
                    start,
                    end,
                });
            }
            (start, end)
        } else {
            let value = parse_value(range, spec)?;
            // `N/S` runs from N up to the field maximum.
            match step {
                Some(_) => (value, spec.max),
                None => (value, value),
            }
        };

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            set.insert(value);
        }
    }

    Ok(set)
}

fn parse_value(raw: &str, spec: FieldSpec) -> Result<u32, CronError> {
    let lower = raw.to_ascii_lowercase();
    if let Some(pos) = spec.names.iter().position(|name| *name == lower) {
        return Ok(spec.names_base + pos as u32);
    }

    let value: u32 = raw.parse().map_err(|_| invalid(spec, raw))?;
    if value < spec.min || value > spec.max {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}

fn invalid(spec: FieldSpec, value: &str) -> CronError {
    CronError::InvalidValue {
        field: spec.name,
        value: value.to_string(),
    }
}

fn truncate_to_minute(t: NaiveDateTime) -> Option<NaiveDateTime> {
    t.date().and_hms_opt(t.hour(), t.minute(), 0)
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = match date.month() {
        12 => (date.year() + 1, 1),
        m => (date.year(), m + 1),
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}
