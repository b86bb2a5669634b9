//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.
//! A single process only; replicas need a shared backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{Storage, StorageError};
use crate::core::job::{Job, JobExecution, JobFilter, PageRequest};
use crate::core::types::{ExecutionId, JobId, JobName, TenantId};

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    jobs: RwLock<HashMap<JobId, Job>>,
    executions: RwLock<Vec<JobExecution>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            executions: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn page_of<T>(items: Vec<T>, page: PageRequest) -> Vec<T> {
    items
        .into_iter()
        .skip(page.offset())
        .take(page.size)
        .collect()
}

fn newest_first(mut executions: Vec<JobExecution>) -> Vec<JobExecution> {
    // Stored in insertion order; reversing first keeps ties newest first too.
    executions.reverse();
    executions.sort_by(|a, b| b.created_date.cmp(&a.created_date));
    executions
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_job(&self, job: Job) -> Result<(), StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        let clash = jobs.values().any(|other| {
            other.id != job.id
                && other.application_name == job.application_name
                && other.name == job.name
        });
        if clash {
            return Err(StorageError::DuplicateKey(format!(
                "job: {}/{}",
                job.application_name, job.name
            )));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, tenant_id: &TenantId, id: &JobId) -> Result<Job, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        jobs.get(id)
            .filter(|job| &job.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("job: {}", id)))
    }

    async fn find_by_application(&self, application_name: &str) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|job| job.application_name == application_name)
            .cloned()
            .collect();
        result.sort_by_key(|job| job.name.display_name());
        Ok(result)
    }

    async fn find_jobs(
        &self,
        tenant_id: &TenantId,
        filter: &JobFilter,
        page: PageRequest,
    ) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|job| &job.tenant_id == tenant_id && filter.matches(job))
            .cloned()
            .collect();
        result.sort_by_key(|job| job.name.display_name());
        Ok(page_of(result, page))
    }

    async fn count_jobs(
        &self,
        tenant_id: &TenantId,
        filter: &JobFilter,
    ) -> Result<u64, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .values()
            .filter(|job| &job.tenant_id == tenant_id && filter.matches(job))
            .count() as u64)
    }

    async fn find_names(&self, application_name: &str) -> Result<HashSet<JobName>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .values()
            .filter(|job| job.application_name == application_name)
            .map(|job| job.name.clone())
            .collect())
    }

    async fn find_config_enabled_by_name(
        &self,
        application_name: &str,
        names: &HashSet<JobName>,
    ) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .values()
            .filter(|job| {
                job.application_name == application_name
                    && job.config_enabled
                    && names.contains(&job.name)
            })
            .cloned()
            .collect())
    }

    async fn find_config_disabled_by_name(
        &self,
        application_name: &str,
        names: &HashSet<JobName>,
    ) -> Result<Vec<Job>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .values()
            .filter(|job| {
                job.application_name == application_name
                    && !job.config_enabled
                    && names.contains(&job.name)
            })
            .cloned()
            .collect())
    }

    async fn set_config_enabled(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        enabled: bool,
    ) -> Result<u64, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        match jobs.get_mut(id).filter(|job| &job.tenant_id == tenant_id) {
            Some(job) => {
                job.config_enabled = enabled;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn set_user_enabled(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        enabled: bool,
    ) -> Result<u64, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        match jobs.get_mut(id).filter(|job| &job.tenant_id == tenant_id) {
            Some(job) => {
                job.user_enabled = enabled;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn set_next_execution(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
        next_execution: Option<DateTime<Utc>>,
    ) -> Result<u64, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        match jobs
            .get_mut(id)
            .filter(|job| &job.tenant_id == tenant_id && !job.is_in_flight())
        {
            Some(job) => {
                job.next_execution = next_execution;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn clear_running_status(
        &self,
        tenant_id: &TenantId,
        id: &JobId,
    ) -> Result<u64, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        match jobs.get_mut(id).filter(|job| &job.tenant_id == tenant_id) {
            Some(job) => {
                job.job_execution_id = None;
                job.popped_for_execution = None;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_job(&self, tenant_id: &TenantId, id: &JobId) -> Result<u64, StorageError> {
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        if jobs.get(id).is_some_and(|job| &job.tenant_id == tenant_id) {
            jobs.remove(id);
            Ok(1)
        } else {
            Ok(0)
        }
    }

    async fn find_next_execution_time(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let jobs = self.jobs.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(jobs
            .values()
            .filter(|job| job.is_enabled() && !job.is_in_flight())
            .filter_map(|job| job.next_execution)
            .min())
    }

    async fn pop_for_execution(&self) -> Result<Option<Job>, StorageError> {
        // Selection and stamping happen under one write lock.
        let mut jobs = self.jobs.write().map_err(|_| StorageError::LockPoisoned)?;
        let now = Utc::now();
        let next = jobs
            .values_mut()
            .filter(|job| job.is_claimable(now))
            .min_by_key(|job| job.next_execution);
        Ok(next.map(|job| {
            job.claim(ExecutionId::new(), now);
            job.clone()
        }))
    }

    async fn save_execution(&self, mut execution: JobExecution) -> Result<(), StorageError> {
        let mut executions = self
            .executions
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        if executions.iter().any(|e| e.id == execution.id) {
            return Err(StorageError::DuplicateKey(format!(
                "execution: {}",
                execution.id
            )));
        }
        execution.created_date = Utc::now();
        executions.push(execution);
        Ok(())
    }

    async fn find_executions_by_job(
        &self,
        tenant_id: &TenantId,
        job_id: &JobId,
        success: Option<bool>,
        page: PageRequest,
    ) -> Result<Vec<JobExecution>, StorageError> {
        let executions = self
            .executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let result: Vec<_> = executions
            .iter()
            .filter(|e| {
                &e.tenant_id == tenant_id
                    && &e.job_id == job_id
                    && success.is_none_or(|s| e.success == s)
            })
            .cloned()
            .collect();
        Ok(page_of(newest_first(result), page))
    }

    async fn find_execution(
        &self,
        tenant_id: &TenantId,
        id: &ExecutionId,
    ) -> Result<Option<JobExecution>, StorageError> {
        let executions = self
            .executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        Ok(executions
            .iter()
            .find(|e| &e.tenant_id == tenant_id && &e.id == id)
            .cloned())
    }

    async fn find_executions(
        &self,
        tenant_id: &TenantId,
        success: Option<bool>,
        page: PageRequest,
    ) -> Result<Vec<JobExecution>, StorageError> {
        let executions = self
            .executions
            .read()
            .map_err(|_| StorageError::LockPoisoned)?;
        let result: Vec<_> = executions
            .iter()
            .filter(|e| &e.tenant_id == tenant_id && success.is_none_or(|s| e.success == s))
            .cloned()
            .collect();
        Ok(page_of(newest_first(result), page))
    }
}
