//! Schedule descriptors and next fire time calculation.
//!
//! A schedule is one of four kinds:
//! - `Cron`: six-field cron expression (second, minute, hour, day of month,
//!   month, day of week) or a shortcut such as `@daily`
//! - `Delay`: fixed gap between the end of one run and the start of the next
//! - `Rate`: fixed period between start times, skipping missed ticks
//! - `Manual`: never fires on its own
//!
//! The next fire time is computed when a job is created and after each
//! completed run, never while a run is in flight.

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::duration::{self, iso8601};

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// Errors that can occur when parsing or evaluating schedules.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Invalid cron expression.
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// Invalid timezone.
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    /// Invalid delay or rate.
    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    /// The cron expression has no occurrence after the given instant.
    #[error("no more occurrences of '{0}'")]
    NoMoreOccurrences(String),

    /// The next fire time does not fit in the supported date range.
    #[error("next execution time is out of range")]
    OutOfRange,
}

/// When a job should run.
///
/// Persisted as an object tagged by `type` (`cron`, `delay`, `rate`, `manual`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Schedule {
    /// Cron-like schedule. Never overlaps itself: the next occurrence is only
    /// computed once the previous run has finished.
    Cron {
        cron: String,
        /// IANA zone the expression is evaluated in; UTC when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        zone: Option<String>,
    },

    /// Fixed period between the end of the last run and the start of the next.
    Delay {
        #[serde(with = "iso8601")]
        delay: Duration,
    },

    /// Fixed period between start times.
    Rate {
        #[serde(with = "iso8601")]
        rate: Duration,
        /// Anchor of the rate grid, set on the first calculation.
        #[serde(rename = "firstExecution", default)]
        first_execution: Option<DateTime<Utc>>,
    },

    /// Only runs when explicitly scheduled.
    Manual,
}

impl Schedule {
    /// Cron schedule evaluated in UTC.
    pub fn cron(expression: impl Into<String>) -> Self {
        Schedule::Cron {
            cron: expression.into(),
            zone: None,
        }
    }

    /// Cron schedule evaluated in the given IANA timezone.
    pub fn cron_in_zone(expression: impl Into<String>, zone: impl Into<String>) -> Self {
        Schedule::Cron {
            cron: expression.into(),
            zone: Some(zone.into()),
        }
    }

    pub fn delay(delay: Duration) -> Self {
        Schedule::Delay { delay }
    }

    /// Rate schedule anchored at its first calculation.
    pub fn rate(rate: Duration) -> Self {
        Schedule::Rate {
            rate,
            first_execution: None,
        }
    }

    pub fn manual() -> Self {
        Schedule::Manual
    }

    /// The persisted discriminator of this schedule.
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Cron { .. } => "cron",
            Schedule::Delay { .. } => "delay",
            Schedule::Rate { .. } => "rate",
            Schedule::Manual => "manual",
        }
    }

    /// Calculate the next execution time relative to `now`.
    ///
    /// Returns `None` for manual schedules. A rate schedule without an anchor
    /// is anchored at `now` and fires immediately.
    pub fn next_execution(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        match self {
            Schedule::Cron { cron, zone } => next_cron(cron, zone.as_deref(), now).map(Some),
            Schedule::Delay { delay } => add(now, *delay).map(Some),
            Schedule::Rate {
                rate,
                first_execution,
            } => {
                if rate.is_zero() {
                    return Err(ScheduleError::InvalidDuration("rate must be positive".into()));
                }
                match first_execution {
                    None => {
                        *first_execution = Some(now);
                        Ok(Some(now))
                    }
                    Some(first) => next_rate_tick(*first, *rate, now).map(Some),
                }
            }
            Schedule::Manual => Ok(None),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Cron { cron, zone: None } => write!(f, "cron({})", cron),
            Schedule::Cron {
                cron,
                zone: Some(zone),
            } => write!(f, "cron({} {})", cron, zone),
            Schedule::Delay { delay } => write!(f, "delay({})", duration::format(*delay)),
            Schedule::Rate { rate, .. } => write!(f, "rate({})", duration::format(*rate)),
            Schedule::Manual => write!(f, "manual"),
        }
    }
}

fn add(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>, ScheduleError> {
    let delta = TimeDelta::from_std(duration).map_err(|_| ScheduleError::OutOfRange)?;
    now.checked_add_signed(delta).ok_or(ScheduleError::OutOfRange)
}

/// `first + rate * (k + 1)` where `k` is the number of whole periods elapsed
/// since `first`. Ticks missed while a run outlasted the rate are skipped.
fn next_rate_tick(
    first: DateTime<Utc>,
    rate: Duration,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let elapsed = now - first;
    let elapsed_nanos =
        i128::from(elapsed.num_seconds()) * NANOS_PER_SEC + i128::from(elapsed.subsec_nanos());
    let rate_nanos = rate.as_nanos() as i128;
    // An anchor in the future yields `first + rate`.
    let periods = (elapsed_nanos / rate_nanos).max(0);
    let offset = rate_nanos * (periods + 1);

    let secs = i64::try_from(offset / NANOS_PER_SEC).map_err(|_| ScheduleError::OutOfRange)?;
    let nanos = (offset % NANOS_PER_SEC) as i64;
    let delta = TimeDelta::try_seconds(secs)
        .ok_or(ScheduleError::OutOfRange)?
        .checked_add(&TimeDelta::nanoseconds(nanos))
        .ok_or(ScheduleError::OutOfRange)?;
    first.checked_add_signed(delta).ok_or(ScheduleError::OutOfRange)
}

fn next_cron(
    expression: &str,
    zone: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let tz: Tz = match zone {
        Some(zone) => zone
            .parse()
            .map_err(|_| ScheduleError::InvalidTimezone(zone.to_string()))?,
        None => Tz::UTC,
    };
    let schedule = parse_cron(expression)?;
    schedule
        .after(&now.with_timezone(&tz))
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::NoMoreOccurrences(expression.to_string()))
}

/// Parse a six-field cron expression or one of the `@` shortcuts.
pub fn parse_cron(expression: &str) -> Result<CronSchedule, ScheduleError> {
    let trimmed = expression.trim();
    let invalid = |reason: String| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason,
    };

    let six_fields = if trimmed.starts_with('@') {
        match trimmed.to_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 0 1 1 *",
            "@monthly" => "0 0 0 1 * *",
            "@weekly" => "0 0 0 * * SUN",
            "@daily" | "@midnight" => "0 0 0 * * *",
            "@hourly" => "0 0 * * * *",
            _ => return Err(invalid("unknown shortcut".into())),
        }
    } else {
        let fields = trimmed.split_whitespace().count();
        if fields != 6 {
            return Err(invalid(format!("expected 6 fields, got {}", fields)));
        }
        trimmed
    };

    CronSchedule::from_str(six_fields).map_err(|e| invalid(e.to_string()))
}
