//! Persistent job state and execution records.
//!
//! A `Job` is the durable unit of scheduled work: the declared work unit it
//! runs, its schedule, its enablement, and its in-flight markers. A
//! `JobExecution` is the immutable record of one run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::{Schedule, ScheduleError};
use super::types::{ExecutionId, JobId, JobName, TenantId};

/// Persistent job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Application that declared the job.
    pub application_name: String,
    /// Declared work unit.
    pub name: JobName,
    pub schedule: Schedule,
    /// Owned by configuration-driven reconciliation.
    pub config_enabled: bool,
    /// Owned by operators.
    pub user_enabled: bool,
    /// When the job becomes eligible to run; `None` for manual schedules.
    pub next_execution: Option<DateTime<Utc>>,
    /// Set when the job is claimed, cleared when the run completes.
    pub popped_for_execution: Option<DateTime<Utc>>,
    /// Set together with `popped_for_execution`; non-null means in flight.
    pub job_execution_id: Option<ExecutionId>,
    pub execution_count: u64,
    pub last_successfully_executed: Option<DateTime<Utc>>,
    pub last_failed_execution: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new, enabled job whose next execution is computed from its
    /// schedule.
    pub fn new(
        tenant_id: TenantId,
        application_name: impl Into<String>,
        name: JobName,
        mut schedule: Schedule,
        now: DateTime<Utc>,
    ) -> Result<Self, ScheduleError> {
        let next_execution = schedule.next_execution(now)?;
        Ok(Self {
            id: JobId::new(),
            tenant_id,
            application_name: application_name.into(),
            name,
            schedule,
            config_enabled: true,
            user_enabled: true,
            next_execution,
            popped_for_execution: None,
            job_execution_id: None,
            execution_count: 0,
            last_successfully_executed: None,
            last_failed_execution: None,
        })
    }

    /// Both enable flags are set.
    pub fn is_enabled(&self) -> bool {
        self.config_enabled && self.user_enabled
    }

    /// A run has been claimed and not yet completed.
    pub fn is_in_flight(&self) -> bool {
        self.job_execution_id.is_some()
    }

    /// Enabled, not in flight, and due at `now`.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.is_enabled()
            && !self.is_in_flight()
            && self.next_execution.is_some_and(|next| next <= now)
    }

    /// Stamp the job as claimed by the run `execution_id`.
    pub fn claim(&mut self, execution_id: ExecutionId, now: DateTime<Utc>) {
        self.job_execution_id = Some(execution_id);
        self.popped_for_execution = Some(now);
    }

    /// Record a successful run and compute the next execution.
    ///
    /// The run markers are cleared and the counter bumped even when the
    /// schedule fails to produce a next execution; the job is then left
    /// without one and the error returned.
    pub fn register_completed_successfully(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<(), ScheduleError> {
        self.last_successfully_executed = Some(now);
        self.update_after_execution(now)
    }

    /// Record a failed run and compute the next execution.
    pub fn register_failed(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.last_failed_execution = Some(now);
        self.update_after_execution(now)
    }

    fn update_after_execution(&mut self, now: DateTime<Utc>) -> Result<(), ScheduleError> {
        self.popped_for_execution = None;
        self.job_execution_id = None;
        self.execution_count += 1;
        match self.schedule.next_execution(now) {
            Ok(next) => {
                self.next_execution = next;
                Ok(())
            }
            Err(e) => {
                self.next_execution = None;
                Err(e)
            }
        }
    }
}

/// Immutable record of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecution {
    /// Equal to the `job_execution_id` the job carried during the run.
    pub id: ExecutionId,
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub success: bool,
    /// Failure text; present iff `success` is false.
    pub stack_trace: Option<String>,
    /// Stamped by the store on insert.
    pub created_date: DateTime<Utc>,
}

impl JobExecution {
    /// Record a successful run of an in-flight job.
    ///
    /// Returns `None` if the job carries no execution id, so this must be
    /// called before the job's run markers are cleared.
    pub fn succeeded(job: &Job) -> Option<Self> {
        Self::of(job, true, None)
    }

    /// Record a failed run of an in-flight job.
    pub fn failed(job: &Job, stack_trace: impl Into<String>) -> Option<Self> {
        Self::of(job, false, Some(stack_trace.into()))
    }

    fn of(job: &Job, success: bool, stack_trace: Option<String>) -> Option<Self> {
        Some(Self {
            id: job.job_execution_id?,
            tenant_id: job.tenant_id,
            job_id: job.id,
            success,
            stack_trace,
            created_date: Utc::now(),
        })
    }
}

/// Filter for administrative job listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    /// Case-insensitive substring of the job's display name.
    pub match_text: Option<String>,
    /// Only jobs with both enable flags set.
    pub exclude_disabled: bool,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        if self.exclude_disabled && !job.is_enabled() {
            return false;
        }
        match &self.match_text {
            Some(text) if !text.is_empty() => job
                .name
                .display_name()
                .to_lowercase()
                .contains(&text.to_lowercase()),
            _ => true,
        }
    }
}

/// Zero-based page of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }

    /// Number of items skipped before this page.
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { page: 0, size: 50 }
    }
}
