//! Startup synchronization of declared work units into the job store.
//!
//! Reconciliation creates jobs for new declarations, disables jobs whose
//! declaration disappeared, and applies the per-job `jobsEnabled` switches
//! to `config_enabled`. It never deletes jobs and never touches
//! `user_enabled`.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::RegistryError;
use super::declaration::{self, Declaration};
use super::work_unit::WorkUnit;
use crate::core::job::Job;
use crate::core::types::{ADMIN_TENANT_ID, JobName};
use crate::storage::Storage;

/// Bean under which the reconciler registers itself.
pub const RECONCILER_BEAN: &str = "jobService";

/// Method under which the reconciler registers itself.
pub const RECONCILER_METHOD: &str = "scanForJobs";

/// Prefix of the per-job enablement properties.
pub const JOBS_ENABLED_PREFIX: &str = "jobScheduler.jobsEnabled.";

/// Name of the reconciler's own job.
pub fn reconciler_job_name() -> JobName {
    JobName::new(RECONCILER_BEAN, RECONCILER_METHOD)
}

/// What a reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Jobs created for new declarations.
    pub created: Vec<JobName>,
    /// Stored jobs no longer declared, now config-disabled.
    pub obsoleted: Vec<JobName>,
    /// Declared jobs switched on by configuration.
    pub config_enabled: Vec<JobName>,
    /// Declared jobs switched off by configuration.
    pub config_disabled: Vec<JobName>,
}

impl ReconcileReport {
    /// No job was written.
    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
            && self.obsoleted.is_empty()
            && self.config_enabled.is_empty()
            && self.config_disabled.is_empty()
    }
}

/// Syncs declarations into the store for one application.
pub struct Reconciler {
    storage: Arc<dyn Storage>,
    application_name: String,
    declarations: Vec<Declaration>,
    jobs_enabled: HashMap<String, bool>,
}

impl Reconciler {
    /// Create a reconciler over a snapshot of the declarations.
    ///
    /// `jobs_enabled` maps `<bean>-<method>` to the configured switch.
    pub fn new(
        storage: Arc<dyn Storage>,
        application_name: impl Into<String>,
        declarations: Vec<Declaration>,
        jobs_enabled: HashMap<String, bool>,
    ) -> Self {
        Self {
            storage,
            application_name: application_name.into(),
            declarations,
            jobs_enabled,
        }
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Run one reconciliation pass.
    ///
    /// All declarations and their enablement properties are checked before
    /// the store is touched.
    pub async fn reconcile(&self) -> Result<ReconcileReport, RegistryError> {
        declaration::validate_all(&self.declarations)?;
        let (enabled_names, disabled_names) = self.partition_by_config()?;

        let app = self.application_name.as_str();
        let mut report = ReconcileReport::default();
        let existing = self.storage.find_names(app).await?;

        // New declarations
        let now = Utc::now();
        for declaration in &self.declarations {
            if existing.contains(&declaration.name) {
                continue;
            }
            let schedule = declaration.schedule()?;
            let job = Job::new(ADMIN_TENANT_ID, app, declaration.name.clone(), schedule, now)
                .map_err(|e| RegistryError::InvalidSchedule {
                    job: declaration.name.display_name(),
                    source: e,
                })?;
            tracing::info!(
                job_name = %job.name,
                schedule = %job.schedule,
                next_execution = ?job.next_execution,
                "Creating job"
            );
            self.storage.save_job(job).await?;
            report.created.push(declaration.name.clone());
        }

        // Obsolete jobs
        let declared: HashSet<&JobName> = self.declarations.iter().map(|d| &d.name).collect();
        for job in self.storage.find_by_application(app).await? {
            if job.config_enabled && !declared.contains(&job.name) {
                tracing::info!(
                    job_id = %job.id,
                    job_name = %job.name,
                    "Disabling job with no declaration"
                );
                self.storage
                    .set_config_enabled(&job.tenant_id, &job.id, false)
                    .await?;
                report.obsoleted.push(job.name);
            }
        }

        // Configuration switches
        for job in self
            .storage
            .find_config_disabled_by_name(app, &enabled_names)
            .await?
        {
            tracing::info!(job_id = %job.id, job_name = %job.name, "Enabling job by configuration");
            self.storage
                .set_config_enabled(&job.tenant_id, &job.id, true)
                .await?;
            report.config_enabled.push(job.name);
        }
        for job in self
            .storage
            .find_config_enabled_by_name(app, &disabled_names)
            .await?
        {
            tracing::info!(
                job_id = %job.id,
                job_name = %job.name,
                "Disabling job by configuration"
            );
            self.storage
                .set_config_enabled(&job.tenant_id, &job.id, false)
                .await?;
            report.config_disabled.push(job.name);
        }

        tracing::info!(
            application = %self.application_name,
            declared = self.declarations.len(),
            created = report.created.len(),
            obsoleted = report.obsoleted.len(),
            enabled = report.config_enabled.len(),
            disabled = report.config_disabled.len(),
            "Job reconciliation finished"
        );
        Ok(report)
    }

    fn partition_by_config(&self) -> Result<(HashSet<JobName>, HashSet<JobName>), RegistryError> {
        let mut enabled = HashSet::new();
        let mut disabled = HashSet::new();
        for declaration in &self.declarations {
            let key = declaration.name.property_key();
            match self.jobs_enabled.get(&key) {
                Some(true) => enabled.insert(declaration.name.clone()),
                Some(false) => disabled.insert(declaration.name.clone()),
                None => {
                    return Err(RegistryError::MissingProperty(format!(
                        "{}{}",
                        JOBS_ENABLED_PREFIX, key
                    )));
                }
            };
        }
        Ok((enabled, disabled))
    }
}

#[async_trait]
impl WorkUnit for Reconciler {
    async fn run(&self) -> anyhow::Result<()> {
        self.reconcile().await?;
        Ok(())
    }
}
