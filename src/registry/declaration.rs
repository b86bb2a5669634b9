//! Schedule declarations attached to work units.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::RegistryError;
use crate::core::duration;
use crate::core::schedule::{Schedule, ScheduleError};
use crate::core::types::JobName;

/// Declared schedule of a work unit.
///
/// At most one of `cron`, `delay` and `rate` may be set; none means the job
/// only runs when scheduled by hand. Empty strings count as unset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledJob {
    /// Six-field cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    /// Zone the cron expression is evaluated in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// ISO-8601 duration between the end of a run and the next start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    /// ISO-8601 duration between start times.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
}

impl ScheduledJob {
    pub fn cron(expression: impl Into<String>) -> Self {
        Self {
            cron: Some(expression.into()),
            ..Self::default()
        }
    }

    pub fn delay(duration: impl Into<String>) -> Self {
        Self {
            delay: Some(duration.into()),
            ..Self::default()
        }
    }

    pub fn rate(duration: impl Into<String>) -> Self {
        Self {
            rate: Some(duration.into()),
            ..Self::default()
        }
    }

    pub fn manual() -> Self {
        Self::default()
    }

    /// Evaluate the cron expression in the given IANA zone.
    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }

    fn set(field: &Option<String>) -> Option<&str> {
        field.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// A work unit's name together with its declared schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: JobName,
    pub scheduled: ScheduledJob,
}

impl Declaration {
    pub fn new(name: JobName, scheduled: ScheduledJob) -> Self {
        Self { name, scheduled }
    }

    /// Build the schedule descriptor for a new job.
    pub fn schedule(&self) -> Result<Schedule, RegistryError> {
        let job = || self.name.display_name();
        let invalid = |e: ScheduleError| RegistryError::InvalidSchedule {
            job: job(),
            source: e,
        };

        let cron = ScheduledJob::set(&self.scheduled.cron);
        let delay = ScheduledJob::set(&self.scheduled.delay);
        let rate = ScheduledJob::set(&self.scheduled.rate);

        match (cron, delay, rate) {
            (Some(expression), None, None) => Ok(match ScheduledJob::set(&self.scheduled.zone) {
                Some(zone) => Schedule::cron_in_zone(expression, zone),
                None => Schedule::cron(expression),
            }),
            (None, Some(text), None) => duration::parse(text)
                .map(Schedule::delay)
                .map_err(|e| invalid(ScheduleError::InvalidDuration(e.to_string()))),
            (None, None, Some(text)) => duration::parse(text)
                .map(Schedule::rate)
                .map_err(|e| invalid(ScheduleError::InvalidDuration(e.to_string()))),
            (None, None, None) => Ok(Schedule::manual()),
            _ => Err(RegistryError::ConflictingSchedules(job())),
        }
    }

    /// Check that the declaration yields a schedule with a computable next
    /// execution.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let mut schedule = self.schedule()?;
        schedule
            .next_execution(Utc::now())
            .map_err(|e| RegistryError::InvalidSchedule {
                job: self.name.display_name(),
                source: e,
            })?;
        Ok(())
    }
}

/// Validate every declaration up front, rejecting duplicate names.
pub fn validate_all(declarations: &[Declaration]) -> Result<(), RegistryError> {
    let mut seen = HashSet::new();
    for declaration in declarations {
        if !seen.insert(&declaration.name) {
            return Err(RegistryError::DuplicateJob(declaration.name.display_name()));
        }
        declaration.validate()?;
    }
    Ok(())
}
