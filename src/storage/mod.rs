//! Storage abstraction for persisting jobs and job executions.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite). The store is shared by every
//! scheduler replica; `pop_for_execution` is the one operation that must be
//! atomic against it.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

use crate::core::job::{Job, JobExecution, JobFilter, PageRequest};
use crate::core::types::{ExecutionId, JobId, JobName, TenantId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Storage trait for persisting scheduler state.
///
/// Point updates return the number of jobs modified (0 or 1).
#[async_trait]
pub trait Storage: Send + Sync {
    // Job operations

    /// Insert or replace a job by id.
    async fn save_job(&self, job: Job) -> Result<(), StorageError>;

    /// Insert or replace several jobs.
    async fn save_jobs(&self, jobs: Vec<Job>) -> Result<(), StorageError> {
        for job in jobs {
            self.save_job(job).await?;
        }
        Ok(())
    }

    /// Get a job by tenant and id.
    async fn get_job(&self, tenant_id: &TenantId, id: &JobId) -> Result<Job, StorageError>;

    /// All jobs declared by an application.
    async fn find_by_application(&self, application_name: &str) -> Result<Vec<Job>, StorageError>;

    /// A page of a tenant's jobs matching the filter, ordered by name.
    async fn find_jobs(
        &self,
        tenant_id: &TenantId,
        filter: &JobFilter,
        page: PageRequest,
    ) -> Result<Vec<Job>, StorageError>;

    /// Number of a tenant's jobs matching the filter.
    async fn count_jobs(
        &self,
        tenant_id: &TenantId,
        filter: &JobFilter,
    ) -> Result<u64, StorageError>;

    /// Names of the jobs already stored for an application.
    async fn find_names(&self, application_name: &str) -> Result<HashSet<JobName>, StorageError>;

    /// Jobs of an application with one of the given names and `config_enabled` set.
    async fn find_config_enabled_by_name(
        &self,
        application_name: &str,
        names: &HashSet<JobName>,
    ) -> Result<Vec<Job>, StorageError>;

    /// Jobs of an application with one of the given names and `config_enabled` clear.
    async fn find_config_disabled_by_name(
        &self,
        application_name: &str,
        names: &HashSet<JobName>,
    ) -> Result<Vec<Job>, StorageError>;

    /// Set the configuration-owned enable flag.
    async fn set_config_enabled(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        enabled: bool,
    ) -> Result<u64, StorageError>;

    async fn set_user_enabled(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        enabled: bool,
    ) -> Result<u64, StorageError>;

    /// Reschedule a job. No-op (returns 0) while the job is in flight.
    async fn set_next_execution(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<u64, StorageError>;

    /// Unclaim a stuck job by clearing its run markers.
    async fn clear_running_status(&self, tenant_id: &TenantId, id: &JobId)
    -> Result<u64, StorageError>;

    async fn delete_job(&self, tenant_id: &TenantId, id: &JobId) -> Result<u64, StorageError>;

    /// Earliest `next_execution` among enabled jobs not in flight, due or not.
    async fn find_next_execution_time(&self) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// Atomically claim the due job with the smallest `next_execution`.
    ///
    /// The job is stamped with a fresh execution id and the claim time, and
    /// the stamped job is returned. Two concurrent callers never claim the
    /// same job.
    async fn pop_for_execution(&self) -> Result<Option<Job>, StorageError>;

    // Execution operations

    /// Insert an execution record, stamping its creation date.
    async fn save_execution(&self, execution: JobExecution) -> Result<(), StorageError>;

    /// A job's executions, newest first, optionally only those with the given
    /// outcome.
    async fn find_executions_by_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        success: Option<bool>,
        page: PageRequest,
    ) -> Result<Vec<JobExecution>, StorageError>;

    async fn find_execution(
        &self,
        tenant_id: &TenantId,
        id: &ExecutionId,
    ) -> Result<Option<JobExecution>, StorageError>;

    /// A tenant's executions, newest first, optionally only those with the
    /// given outcome.
    async fn find_executions(
        &self,
        tenant_id: &TenantId,
        success: Option<bool>,
        page: PageRequest,
    ) -> Result<Vec<JobExecution>, StorageError>;
}
