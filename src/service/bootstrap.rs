//! Startup wiring.
//!
//! [`start`] validates the declared work units, reconciles them into the
//! store and runs the dispatch loop behind the initialization barrier.

use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::config::{Config, ConfigError, StorageConfig};
use crate::execution::JobExecutor;
use crate::registry::{
    Declaration, JobRegistry, RECONCILER_BEAN, RECONCILER_METHOD, ReconcileReport, Reconciler,
    RegistryError, ScheduledJob, reconciler_job_name,
};
use crate::scheduler::{
    InitializationBarrier, Scheduler, SchedulerError, SchedulerExit, SchedulerHandle,
};
use crate::storage::{InMemoryStorage, Storage, StorageError};

/// Errors that stop the service from starting.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Open the store named by the configuration.
pub async fn open_storage(config: &StorageConfig) -> Result<Arc<dyn Storage>, ServiceError> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(InMemoryStorage::new())),
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            let storage = crate::storage::SqliteStorage::new(path).await?;
            Ok(Arc::new(storage))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => Err(ConfigError::InvalidConfig(
            "storage type 'sqlite' requires the sqlite feature".into(),
        )
        .into()),
    }
}

/// Opens the barrier when dropped, so it is released on every exit path of
/// reconciliation.
struct ReleaseOnDrop(InitializationBarrier);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// A started service.
pub struct RunningService {
    executor: Arc<JobExecutor>,
    report: Option<ReconcileReport>,
    scheduler: Option<(SchedulerHandle, JoinHandle<SchedulerExit>)>,
}

impl std::fmt::Debug for RunningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningService")
            .field("report", &self.report)
            .field("scheduler", &self.scheduler.is_some())
            .finish()
    }
}

impl RunningService {
    /// What the startup reconciliation changed, if a reconciler is configured.
    pub fn report(&self) -> Option<&ReconcileReport> {
        self.report.as_ref()
    }

    /// Handle to the dispatch loop, if `jobScheduler.enabled` is set.
    pub fn handle(&self) -> Option<&SchedulerHandle> {
        self.scheduler.as_ref().map(|(handle, _)| handle)
    }

    /// The worker used by the dispatch loop.
    pub fn executor(&self) -> Arc<JobExecutor> {
        Arc::clone(&self.executor)
    }

    /// Ask the dispatch loop to stop. Returns once in-flight jobs finished.
    pub async fn shutdown(&self) -> Result<(), SchedulerError> {
        match self.handle() {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        }
    }

    /// Wait for the dispatch loop to end.
    ///
    /// Returns `None` immediately when the dispatch loop is disabled.
    pub async fn wait(self) -> Result<Option<SchedulerExit>, SchedulerError> {
        let Some((_handle, task)) = self.scheduler else {
            return Ok(None);
        };
        let exit = task
            .await
            .map_err(|e| SchedulerError::TaskFailed(e.to_string()))?;
        Ok(Some(exit))
    }
}

/// Wire up and start the service.
///
/// 1. Validate the declared work units.
/// 2. Register the reconciler as the manual job `jobService.scanForJobs`
///    when its `jobsEnabled` switch is on.
/// 3. Start the dispatch loop, if enabled, behind the initialization barrier.
/// 4. Reconcile, releasing the barrier however reconciliation ends.
///
/// A reconciliation error stops the dispatch loop and is returned.
pub async fn start(
    config: &Config,
    storage: Arc<dyn Storage>,
    mut registry: JobRegistry,
) -> Result<RunningService, ServiceError> {
    let scheduler_config = &config.job_scheduler;
    registry.validate()?;

    let reconciler = if scheduler_config.reconciler_enabled() {
        let mut declarations = registry.declarations();
        declarations.push(Declaration::new(reconciler_job_name(), ScheduledJob::manual()));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&storage),
            config.application.name.clone(),
            declarations,
            scheduler_config.jobs_enabled.clone(),
        ));
        registry.register(
            RECONCILER_BEAN,
            RECONCILER_METHOD,
            ScheduledJob::manual(),
            Arc::clone(&reconciler),
        );
        Some(reconciler)
    } else {
        None
    };

    let executor = Arc::new(JobExecutor::new(Arc::clone(&storage), Arc::new(registry)));
    let barrier = InitializationBarrier::new(reconciler.is_some() && scheduler_config.enabled);

    let scheduler = if scheduler_config.enabled {
        let max_parallel_jobs = scheduler_config
            .max_parallel_jobs
            .ok_or_else(|| ConfigError::MissingField("jobScheduler.maxParallelJobs".into()))?;
        let scheduler =
            Scheduler::new(Arc::clone(&storage), Arc::clone(&executor), max_parallel_jobs)
                .with_barrier(barrier.clone())
            .with_poll_interval(scheduler_config.poll_interval)
            .with_exit_when_idle(scheduler_config.exit_when_idle);
        Some(scheduler.start())
    } else {
        tracing::info!("Job scheduler disabled, not dispatching jobs");
        None
    };

    let report = match &reconciler {
        Some(reconciler) => {
            let _release = ReleaseOnDrop(barrier);
            match reconciler.reconcile().await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::error!(error = %e, "Job reconciliation failed");
                    if let Some((handle, _)) = &scheduler
                        && let Err(shutdown_error) = handle.shutdown().await
                    {
                        tracing::warn!(error = %shutdown_error, "Failed to stop scheduler");
                    }
                    return Err(e.into());
                }
            }
        }
        None => None,
    };

    Ok(RunningService {
        executor,
        report,
        scheduler,
    })
}
