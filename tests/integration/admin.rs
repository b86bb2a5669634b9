//! Administrative recovery and manual triggering against a running service.

use crate::common::{config, sqlite_storage, wait_for_executions};
use chrono::Utc;
use jobsched::service;
use jobsched::testing::{CountingWorkUnit, due_job};
use jobsched::{
    ADMIN_TENANT_ID, Config, ExecutionId, JobFilter, JobName, JobRegistry, JobService, PageRequest,
    ScheduledJob, Storage,
};
use std::sync::Arc;
use std::time::Duration;

fn running_config() -> Config {
    config(
        r#"
application:
  name: billing
jobScheduler:
  enabled: true
  maxParallelJobs: 2
  pollInterval: PT0.05S
  jobsEnabled:
    jobService-scanForJobs: true
    reportService-nightly: true
"#,
    )
}

async fn job_id(service: &JobService, name: &str) -> jobsched::JobId {
    let filter = JobFilter {
        match_text: Some(name.to_string()),
        exclude_disabled: false,
    };
    let found = service
        .find(&ADMIN_TENANT_ID, PageRequest::default(), &filter)
        .await
        .unwrap();
    assert_eq!(found.len(), 1, "expected one job matching {}", name);
    found[0].id
}

/// Test: A manual job runs once when an operator schedules it.
#[tokio::test]
async fn test_manual_job_runs_when_scheduled() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let admin = JobService::new(Arc::clone(&storage));

    let runs = CountingWorkUnit::new();
    let registry =
        JobRegistry::new().with("reportService", "nightly", ScheduledJob::manual(), runs.clone());
    let running = service::start(&running_config(), Arc::clone(&storage), registry)
        .await
        .unwrap();

    let id = job_id(&admin, "reportService.nightly").await;
    assert!(admin.set_next_execution(&ADMIN_TENANT_ID, &id, Some(Utc::now())).await.unwrap());

    let executions = wait_for_executions(&*storage, &id, 1, Duration::from_secs(5)).await;
    assert!(executions[0].success);
    assert_eq!(runs.count(), 1);

    running.shutdown().await.unwrap();
    let job = admin.get(&ADMIN_TENANT_ID, &id).await.unwrap();
    assert_eq!(job.next_execution, None, "manual jobs are not rescheduled");
    assert_eq!(job.execution_count, 1);
}

/// Test: The reconciler can be re-run on demand as its own job.
#[tokio::test]
async fn test_reconciler_runs_as_a_job() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let admin = JobService::new(Arc::clone(&storage));

    let registry = JobRegistry::new().with(
        "reportService",
        "nightly",
        ScheduledJob::manual(),
        CountingWorkUnit::new(),
    );
    let running = service::start(&running_config(), Arc::clone(&storage), registry)
        .await
        .unwrap();

    // An operator disables a job by configuration behind the reconciler's back.
    let nightly = job_id(&admin, "reportService.nightly").await;
    storage
        .set_config_enabled(&ADMIN_TENANT_ID, &nightly, false)
        .await
        .unwrap();

    let reconciler = job_id(&admin, "jobService.scanForJobs").await;
    admin
        .set_next_execution(&ADMIN_TENANT_ID, &reconciler, Some(Utc::now()))
        .await
        .unwrap();

    let executions = wait_for_executions(&*storage, &reconciler, 1, Duration::from_secs(5)).await;
    assert!(executions[0].success);
    running.shutdown().await.unwrap();

    let restored = admin.get(&ADMIN_TENANT_ID, &nightly).await.unwrap();
    assert!(restored.config_enabled);
    assert_eq!(
        admin.get(&ADMIN_TENANT_ID, &reconciler).await.unwrap().name,
        JobName::new("jobService", "scanForJobs")
    );
}

/// Test: A job left claimed by a crashed worker stays stuck until cleared.
#[tokio::test]
async fn test_stuck_job_runs_after_clear_running_status() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let admin = JobService::new(Arc::clone(&storage));

    // Left behind by a previous process that died mid-run.
    let mut stuck = due_job("billing", "reportService", "nightly");
    stuck.claim(ExecutionId::new(), Utc::now());
    storage.save_job(stuck.clone()).await.unwrap();

    let runs = CountingWorkUnit::new();
    let registry = JobRegistry::new().with(
        "reportService",
        "nightly",
        ScheduledJob::delay("PT1H"),
        runs.clone(),
    );
    let running = service::start(&running_config(), Arc::clone(&storage), registry)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(runs.count(), 0, "in-flight jobs are never claimed");
    assert!(
        !admin
            .set_next_execution(&ADMIN_TENANT_ID, &stuck.id, Some(Utc::now()))
            .await
            .unwrap(),
        "rescheduling is ignored while in flight"
    );

    assert!(admin.clear_running_status(&ADMIN_TENANT_ID, &stuck.id).await.unwrap());

    let executions = wait_for_executions(&*storage, &stuck.id, 1, Duration::from_secs(5)).await;
    assert!(executions[0].success);
    assert_eq!(runs.count(), 1);
    running.shutdown().await.unwrap();

    let history = admin
        .executions_by_success(&ADMIN_TENANT_ID, true, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
}
