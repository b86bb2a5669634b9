//! Worker that runs one claimed job.
//!
//! The `JobExecutor` handles a job from claim to write-back:
//! - Resolving the declared work unit through a lazily filled cache
//! - Running it inside the job's diagnostic context, catching panics
//! - Recording a `JobExecution` before the job's run markers are cleared
//! - Computing the next execution and persisting the job

use chrono::Utc;
use dashmap::DashMap;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use super::context;
use crate::core::job::{Job, JobExecution};
use crate::core::types::{JobId, JobName};
use crate::registry::{WorkUnit, WorkUnitResolver};
use crate::storage::{Storage, StorageError};

/// Errors that leave a run's outcome unrecorded.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The job was handed over without a claim.
    #[error("job {0} is not claimed for execution")]
    NotClaimed(JobId),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result of running a claimed job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// The job as written back to the store.
    pub job: Job,
    /// Whether the work unit succeeded.
    pub success: bool,
    /// Wall time spent in the work unit.
    pub duration: std::time::Duration,
    /// Failure text if the work unit failed.
    pub error: Option<String>,
}

/// Runs claimed jobs against their declared work units.
pub struct JobExecutor {
    storage: Arc<dyn Storage>,
    resolver: Arc<dyn WorkUnitResolver>,
    cache: DashMap<JobName, Arc<dyn WorkUnit>>,
}

impl JobExecutor {
    pub fn new(storage: Arc<dyn Storage>, resolver: Arc<dyn WorkUnitResolver>) -> Self {
        Self {
            storage,
            resolver,
            cache: DashMap::new(),
        }
    }

    /// Run a claimed job and write back its outcome.
    ///
    /// Work-unit failures are recorded, not returned. An error means the
    /// outcome could not be stored; the job then stays claimed until an
    /// operator clears it.
    pub async fn execute(&self, job: Job) -> Result<JobOutcome, ExecutionError> {
        let execution_id = job
            .job_execution_id
            .ok_or(ExecutionError::NotClaimed(job.id))?;
        let job_name = job.name.display_name();

        context::apply_and_run(execution_id, job_name, self.run_and_record(job)).await
    }

    async fn run_and_record(&self, mut job: Job) -> Result<JobOutcome, ExecutionError> {
        tracing::debug!("Running job");
        let started = Instant::now();
        let result = self.invoke(&job.name).await;
        let duration = started.elapsed();

        let execution = match &result {
            Ok(()) => JobExecution::succeeded(&job),
            Err(trace) => JobExecution::failed(&job, trace.as_str()),
        }
        .ok_or(ExecutionError::NotClaimed(job.id))?;

        // The execution id is the job's claim marker; it must be stored first.
        if let Err(e) = self.storage.save_execution(execution).await {
            tracing::error!(error = %e, "Failed to record job execution, job stays claimed");
            return Err(e.into());
        }

        let now = Utc::now();
        let registered = match &result {
            Ok(()) => {
                tracing::info!(duration = ?duration, "Job completed");
                job.register_completed_successfully(now)
            }
            Err(trace) => {
                tracing::error!(duration = ?duration, error = %trace, "Job failed");
                job.register_failed(now)
            }
        };
        if let Err(e) = registered {
            tracing::error!(
                error = %e,
                "Failed to compute next execution, job will not run again until rescheduled"
            );
        }

        if let Err(e) = self.storage.save_job(job.clone()).await {
            tracing::error!(error = %e, "Failed to save job after execution, job stays claimed");
            return Err(e.into());
        }

        Ok(JobOutcome {
            job,
            success: result.is_ok(),
            duration,
            error: result.err(),
        })
    }

    /// Run the work unit, turning errors and panics into failure text.
    async fn invoke(&self, name: &JobName) -> Result<(), String> {
        let work_unit = self
            .resolve(name)
            .ok_or_else(|| format!("no work unit registered for job '{}'", name))?;

        match AssertUnwindSafe(work_unit.run()).catch_unwind().await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(format!("{:?}", e)),
            Err(panic) => Err(format!("work unit panicked: {}", panic_message(&*panic))),
        }
    }

    fn resolve(&self, name: &JobName) -> Option<Arc<dyn WorkUnit>> {
        if let Some(cached) = self.cache.get(name) {
            return Some(Arc::clone(cached.value()));
        }
        let resolved = self.resolver.resolve(name)?;
        self.cache.insert(name.clone(), Arc::clone(&resolved));
        Some(resolved)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
