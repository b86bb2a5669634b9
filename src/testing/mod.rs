//! Testing utilities for users of the jobsched library.
//!
//! This module provides work-unit doubles and job fixtures:
//!
//! - [`CountingWorkUnit`]: succeeds and counts its runs
//! - [`FailingWorkUnit`]: fails N times then succeeds
//! - [`SlowWorkUnit`]: sleeps and records how many runs overlapped
//! - [`PanickingWorkUnit`]: panics on every run
//! - [`due_job`]: a job that is claimable right now

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::core::job::Job;
use crate::core::schedule::Schedule;
use crate::core::types::{ADMIN_TENANT_ID, JobName};
use crate::registry::WorkUnit;

/// A work unit that always succeeds and counts its runs.
///
/// Clones share the counter, so one clone can be registered and the other
/// kept for assertions.
///
/// # Example
///
/// ```
/// use jobsched::testing::CountingWorkUnit;
/// use jobsched::{JobRegistry, ScheduledJob};
///
/// let counter = CountingWorkUnit::new();
/// let registry = JobRegistry::new().with(
///     "reportService",
///     "nightly",
///     ScheduledJob::cron("0 0 2 * * *"),
///     counter.clone(),
/// );
/// assert_eq!(registry.len(), 1);
/// assert_eq!(counter.count(), 0);
/// ```
#[derive(Clone, Default)]
pub struct CountingWorkUnit {
    runs: Arc<AtomicUsize>,
}

impl CountingWorkUnit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed runs.
    pub fn count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkUnit for CountingWorkUnit {
    async fn run(&self) -> anyhow::Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A work unit that fails a set number of times, then succeeds.
///
/// ```
/// use jobsched::testing::FailingWorkUnit;
///
/// // Fails 2 times, then succeeds on the 3rd run
/// let unit = FailingWorkUnit::new(2);
/// ```
pub struct FailingWorkUnit {
    /// Guards the check-and-decrement under concurrent runs.
    state: Mutex<FailingState>,
    total_failures: u32,
    error_message: String,
}

struct FailingState {
    failures_remaining: u32,
    call_count: u32,
}

impl FailingWorkUnit {
    /// Create a work unit that fails `fail_count` times then succeeds.
    pub fn new(fail_count: u32) -> Self {
        Self::with_error(fail_count, "intentional test failure")
    }

    /// A work unit that fails on every run.
    pub fn always() -> Self {
        Self::new(u32::MAX)
    }

    /// Create a work unit that fails with a custom error message.
    pub fn with_error(fail_count: u32, message: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(FailingState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
            total_failures: fail_count,
            error_message: message.into(),
        }
    }

    pub async fn failures_remaining(&self) -> u32 {
        self.state.lock().await.failures_remaining
    }

    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }

    /// Reset the failure counter for reuse.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.failures_remaining = self.total_failures;
        state.call_count = 0;
    }
}

#[async_trait]
impl WorkUnit for FailingWorkUnit {
    async fn run(&self) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            anyhow::bail!("{}", self.error_message);
        }
        Ok(())
    }
}

/// A work unit that sleeps, recording how many of its runs overlapped.
#[derive(Clone)]
pub struct SlowWorkUnit {
    duration: Duration,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
    completed: Arc<AtomicUsize>,
}

impl SlowWorkUnit {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            running: Arc::new(AtomicUsize::new(0)),
            max_running: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Runs currently sleeping.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of runs observed at the same time.
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkUnit for SlowWorkUnit {
    async fn run(&self) -> anyhow::Result<()> {
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A work unit that panics on every run.
pub struct PanickingWorkUnit {
    message: String,
}

impl PanickingWorkUnit {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl WorkUnit for PanickingWorkUnit {
    async fn run(&self) -> anyhow::Result<()> {
        panic!("{}", self.message);
    }
}

/// An admin-tenant job for `bean.method` whose next execution has passed.
///
/// The job runs again an hour after each run.
pub fn due_job(application_name: &str, bean: &str, method: &str) -> Job {
    let now = Utc::now();
    let mut job = Job::new(
        ADMIN_TENANT_ID,
        application_name,
        JobName::new(bean, method),
        Schedule::delay(Duration::from_secs(3600)),
        now,
    )
    .expect("fixed delay schedule has a next execution");
    job.next_execution = Some(now - TimeDelta::seconds(1));
    job
}
