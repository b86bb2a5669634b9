//! Dispatch loop.
//!
//! A single task claims due jobs from the store and hands each to a worker
//! task, holding one permit of a `max_parallel_jobs` semaphore per worker.
//! Between claims it sleeps until the next job is due, but never longer
//! than the poll interval.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::barrier::InitializationBarrier;
use super::handle::{COMMAND_CHANNEL_BUFFER, SchedulerHandle};
use super::types::{SchedulerCommand, SchedulerExit, SchedulerState};
use crate::execution::JobExecutor;
use crate::storage::{Storage, StorageError};

/// Default upper bound on the idle sleep.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Default sleep after an unexpected error in the loop.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(600);

/// How long to sleep when nothing is due: until `next_execution`, capped at
/// `poll_interval`, and zero when it has already passed.
pub fn adaptive_delay(
    next_execution: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    poll_interval: Duration,
) -> Duration {
    match next_execution {
        Some(next) => (next - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(poll_interval),
        None => poll_interval,
    }
}

/// Outcome of one claim attempt.
enum Dispatch {
    Started,
    NothingDue,
}

/// Main scheduler for job dispatch.
pub struct Scheduler {
    storage: Arc<dyn Storage>,
    executor: Arc<JobExecutor>,
    barrier: InitializationBarrier,
    max_parallel_jobs: usize,
    poll_interval: Duration,
    exit_when_idle: bool,
    error_backoff: Duration,
}

impl Scheduler {
    /// Create a scheduler running at most `max_parallel_jobs` jobs at once.
    pub fn new(
        storage: Arc<dyn Storage>,
        executor: Arc<JobExecutor>,
        max_parallel_jobs: usize,
    ) -> Self {
        if max_parallel_jobs == 0 {
            tracing::warn!("max_parallel_jobs is 0, using 1");
        }
        Self {
            storage,
            executor,
            barrier: InitializationBarrier::released(),
            max_parallel_jobs: max_parallel_jobs.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
            exit_when_idle: false,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }

    /// Set the barrier awaited before the first claim.
    pub fn with_barrier(mut self, barrier: InitializationBarrier) -> Self {
        self.barrier = barrier;
        self
    }

    /// Set the upper bound on the idle sleep.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Stop once nothing is due and no worker is running.
    pub fn with_exit_when_idle(mut self, exit_when_idle: bool) -> Self {
        self.exit_when_idle = exit_when_idle;
        self
    }

    /// Set the sleep after an unexpected error.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Start the dispatch loop and return a handle for controlling it.
    pub fn start(self) -> (SchedulerHandle, JoinHandle<SchedulerExit>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Starting));
        let permits = Arc::new(Semaphore::new(self.max_parallel_jobs));

        let handle = SchedulerHandle {
            command_tx,
            state: Arc::clone(&state),
            permits: Arc::clone(&permits),
            max_parallel_jobs: self.max_parallel_jobs,
        };

        let scheduler_task =
            tokio::spawn(async move { self.run(command_rx, state, permits).await });

        (handle, scheduler_task)
    }

    /// Main scheduler loop.
    ///
    /// Shutdown is only observed while waiting (for the barrier, a permit, or
    /// a sleep), never in the middle of a claim.
    async fn run(
        self,
        mut command_rx: mpsc::Receiver<SchedulerCommand>,
        state: Arc<RwLock<SchedulerState>>,
        permits: Arc<Semaphore>,
    ) -> SchedulerExit {
        tokio::select! {
            Some(command) = command_rx.recv() => {
                return self.shutdown(command, &state, &permits).await;
            }
            _ = self.barrier.wait() => {}
        }

        *state.write().await = SchedulerState::Running;
        tracing::info!(
            max_parallel_jobs = self.max_parallel_jobs,
            poll_interval = ?self.poll_interval,
            exit_when_idle = self.exit_when_idle,
            "Scheduler started"
        );

        loop {
            let permit = tokio::select! {
                Some(command) = command_rx.recv() => {
                    return self.shutdown(command, &state, &permits).await;
                }
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    // The semaphore is never closed.
                    Err(_) => return SchedulerExit::Shutdown,
                },
            };

            let sleep_for = match self.dispatch_next(permit).await {
                Ok(Dispatch::Started) => continue,
                Ok(Dispatch::NothingDue) => {
                    if self.exit_when_idle
                        && permits.available_permits() == self.max_parallel_jobs
                    {
                        tracing::info!("No jobs due or running, exiting");
                        *state.write().await = SchedulerState::Stopped;
                        return SchedulerExit::Idle;
                    }
                    match self.idle_delay().await {
                        Ok(delay) => delay,
                        Err(e) => self.backoff_after(&e),
                    }
                }
                Err(e) => self.backoff_after(&e),
            };

            tokio::select! {
                Some(command) = command_rx.recv() => {
                    return self.shutdown(command, &state, &permits).await;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Claim the next due job and spawn its worker.
    ///
    /// The permit travels with the worker, or is released here if nothing
    /// was claimed.
    async fn dispatch_next(&self, permit: OwnedSemaphorePermit) -> Result<Dispatch, StorageError> {
        let Some(job) = self.storage.pop_for_execution().await? else {
            return Ok(Dispatch::NothingDue);
        };

        tracing::debug!(job_id = %job.id, job_name = %job.name, "Dispatching job");
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let job_id = job.id;
            if let Err(e) = executor.execute(job).await {
                tracing::error!(job_id = %job_id, error = %e, "Job outcome was not stored");
            }
            drop(permit);
        });
        Ok(Dispatch::Started)
    }

    async fn idle_delay(&self) -> Result<Duration, StorageError> {
        let next = self.storage.find_next_execution_time().await?;
        let delay = adaptive_delay(next, Utc::now(), self.poll_interval);
        tracing::trace!(next_execution = ?next, delay = ?delay, "Nothing due, sleeping");
        Ok(delay)
    }

    fn backoff_after(&self, error: &StorageError) -> Duration {
        tracing::error!(
            error = %error,
            backoff = ?self.error_backoff,
            "Unexpected error in scheduler loop, backing off"
        );
        self.error_backoff
    }

    /// Stop claiming and wait, without bound, for in-flight workers.
    async fn shutdown(
        &self,
        command: SchedulerCommand,
        state: &RwLock<SchedulerState>,
        permits: &Semaphore,
    ) -> SchedulerExit {
        let SchedulerCommand::Shutdown { response } = command;
        *state.write().await = SchedulerState::Draining;

        let in_flight = self.max_parallel_jobs - permits.available_permits();
        if in_flight > 0 {
            tracing::info!(in_flight, "Graceful shutdown: waiting for running jobs");
        }
        // Holding every permit means no worker is left.
        let drained = permits.acquire_many(self.max_parallel_jobs as u32).await;
        drop(drained);

        *state.write().await = SchedulerState::Stopped;
        tracing::info!("Scheduler stopped");
        respond(response);
        SchedulerExit::Shutdown
    }
}

fn respond(response: oneshot::Sender<()>) {
    let _ = response.send(());
}
