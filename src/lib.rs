//! jobsched - a persistent, multi-tenant job scheduler.
//!
//! Declared work units are reconciled into a shared job store at startup.
//! A bounded-parallelism dispatch loop then claims due jobs atomically, so a
//! job never runs twice at once even with several replicas on one store.

pub mod config;
pub mod core;
pub mod execution;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod testing;

pub use config::{Config, ConfigError, JobSchedulerConfig, StorageConfig, YamlLoader};
pub use core::job::{Job, JobExecution, JobFilter, PageRequest};
pub use core::schedule::{Schedule, ScheduleError};
pub use core::types::{ADMIN_TENANT_ID, ExecutionId, JobId, JobName, TenantId};
pub use execution::{DiagnosticContext, ExecutionError, JobExecutor, JobOutcome};
pub use registry::{
    JobRegistry, ReconcileReport, Reconciler, RegistryError, ScheduledJob, WorkUnit,
    WorkUnitResolver, work_unit_fn,
};
pub use scheduler::{
    InitializationBarrier, Scheduler, SchedulerError, SchedulerExit, SchedulerHandle,
    SchedulerState,
};
pub use service::{JobService, RunningService, ServiceError};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{InMemoryStorage, Storage, StorageError};
