//! Administrative operations on jobs and their execution history.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::core::job::{Job, JobExecution, JobFilter, PageRequest};
use crate::core::types::{ExecutionId, JobId, TenantId};
use crate::storage::{Storage, StorageError};

/// Facade used by operators and tooling.
///
/// Point updates report whether a job was modified.
#[derive(Clone)]
pub struct JobService {
    storage: Arc<dyn Storage>,
}

impl JobService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// A page of a tenant's jobs, ordered by name.
    pub async fn find(
        &self,
        tenant_id: &TenantId,
        page: PageRequest,
        filter: &JobFilter,
    ) -> Result<Vec<Job>, StorageError> {
        self.storage.find_jobs(tenant_id, filter, page).await
    }

    pub async fn count(
        &self,
        tenant_id: &TenantId,
        filter: &JobFilter,
    ) -> Result<u64, StorageError> {
        self.storage.count_jobs(tenant_id, filter).await
    }

    pub async fn get(&self, tenant_id: &TenantId, id: &JobId) -> Result<Job, StorageError> {
        self.storage.get_job(tenant_id, id).await
    }

    pub async fn save(&self, job: Job) -> Result<(), StorageError> {
        self.storage.save_job(job).await
    }

    pub async fn delete(&self, tenant_id: &TenantId, id: &JobId) -> Result<bool, StorageError> {
        let deleted = self.storage.delete_job(tenant_id, id).await? > 0;
        if deleted {
            tracing::info!(job_id = %id, "Deleted job");
        }
        Ok(deleted)
    }

    pub async fn set_user_enabled(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        enabled: bool,
    ) -> Result<bool, StorageError> {
        let modified = self.storage.set_user_enabled(tenant_id, id, enabled).await? > 0;
        if modified {
            tracing::info!(job_id = %id, enabled, "Changed user enablement");
        }
        Ok(modified)
    }

    /// Reschedule a job. Ignored (returns false) while the job is in flight.
    pub async fn set_next_execution(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<bool, StorageError> {
        let modified = self
            .storage
            .set_next_execution(tenant_id, id, next_execution)
            .await?
            > 0;
        if modified {
            tracing::info!(job_id = %id, next_execution = ?next_execution, "Rescheduled job");
        } else {
            tracing::warn!(job_id = %id, "Job not rescheduled, it is missing or in flight");
        }
        Ok(modified)
    }

    /// Unstick a job left claimed by a crashed worker.
    ///
    /// Only safe once the operator knows the run is no longer in progress.
    pub async fn clear_running_status(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
    ) -> Result<bool, StorageError> {
        let modified = self.storage.clear_running_status(tenant_id, id).await? > 0;
        if modified {
            tracing::warn!(job_id = %id, "Cleared running status");
        }
        Ok(modified)
    }

    /// A job's executions, newest first. `success` keeps only runs with that
    /// outcome.
    pub async fn executions_for_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        success: Option<bool>,
        page: PageRequest,
    ) -> Result<Vec<JobExecution>, StorageError> {
        self.storage
            .find_executions_by_job(tenant_id, job_id, success, page)
            .await
    }

    pub async fn execution(
        &self,
        tenant_id: &TenantId,
        id: &ExecutionId,
    ) -> Result<Option<JobExecution>, StorageError> {
        self.storage.find_execution(tenant_id, id).await
    }

    /// All of a tenant's executions, newest first.
    pub async fn executions(
        &self,
        tenant_id: &TenantId,
        page: PageRequest,
    ) -> Result<Vec<JobExecution>, StorageError> {
        self.storage.find_executions(tenant_id, None, page).await
    }

    pub async fn executions_by_success(
        &self,
        tenant_id: &TenantId,
        success: bool,
        page: PageRequest,
    ) -> Result<Vec<JobExecution>, StorageError> {
        self.storage
            .find_executions(tenant_id, Some(success), page)
            .await
    }
}
