//! Common test utilities shared across integration tests.

use jobsched::{
    ADMIN_TENANT_ID, Config, JobExecution, JobId, PageRequest, SqliteStorage, Storage,
};
use std::time::Duration;
use tempfile::TempDir;

/// A SQLite store in a fresh temporary directory.
///
/// The directory is removed when the returned guard is dropped.
pub async fn sqlite_storage() -> (SqliteStorage, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let storage = SqliteStorage::new(dir.path().join("jobs.db")).await.unwrap();
    (storage, dir)
}

/// Open a second handle on the database in `dir`, as another replica would.
pub async fn open_replica(dir: &TempDir) -> SqliteStorage {
    SqliteStorage::new(dir.path().join("jobs.db")).await.unwrap()
}

/// Parse a configuration, panicking on error.
pub fn config(yaml: &str) -> Config {
    jobsched::YamlLoader::parse_config(yaml).unwrap()
}

/// Wait until a job has at least `count` executions, polling storage.
///
/// This is more reliable than fixed sleeps since execution time can vary.
/// Polls storage every 10ms.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_executions(
    storage: &dyn Storage,
    job_id: &JobId,
    count: usize,
    timeout: Duration,
) -> Vec<JobExecution> {
    let start = tokio::time::Instant::now();
    loop {
        let executions = storage
            .find_executions_by_job(&ADMIN_TENANT_ID, job_id, None, PageRequest::default())
            .await
            .unwrap();
        if executions.len() >= count {
            return executions;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for {} executions of job {}, found {}",
                count,
                job_id,
                executions.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
