//! Configuration structures.
//!
//! Field names follow the camelCase property keys, so a file reads
//! `jobScheduler.maxParallelJobs` the same way the keys are documented.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::core::duration::iso8601;
use crate::registry::{RECONCILER_BEAN, RECONCILER_METHOD};
use crate::scheduler::DEFAULT_POLL_INTERVAL;

/// Root of a configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub job_scheduler: JobSchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Identity of the application owning the declared jobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Scopes the uniqueness of job names in a shared store.
    #[serde(default)]
    pub name: String,
}

/// The `jobScheduler.*` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSchedulerConfig {
    /// Gates the dispatch loop. Reconciliation runs either way.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_poll_interval", with = "iso8601")]
    pub poll_interval: Duration,
    /// Required when `enabled` is set.
    #[serde(default)]
    pub max_parallel_jobs: Option<usize>,
    #[serde(default)]
    pub exit_when_idle: bool,
    /// Per-job switches keyed by `<bean>-<method>`.
    #[serde(default)]
    pub jobs_enabled: HashMap<String, bool>,
}

fn default_poll_interval() -> Duration {
    DEFAULT_POLL_INTERVAL
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_parallel_jobs: None,
            exit_when_idle: false,
            jobs_enabled: HashMap::new(),
        }
    }
}

impl JobSchedulerConfig {
    /// Whether the reconciler is switched on through its own `jobsEnabled` key.
    pub fn reconciler_enabled(&self) -> bool {
        let key = format!("{}-{}", RECONCILER_BEAN, RECONCILER_METHOD);
        self.jobs_enabled.get(&key).copied().unwrap_or(false)
    }
}

/// Where jobs are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (non-persistent, single process).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}
