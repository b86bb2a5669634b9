//! Reconciliation of declared work units across service restarts.

use crate::common::{config, open_replica, sqlite_storage};
use jobsched::service;
use jobsched::testing::CountingWorkUnit;
use jobsched::{
    ADMIN_TENANT_ID, Config, Job, JobFilter, JobName, JobRegistry, PageRequest, RegistryError,
    ScheduledJob, ServiceError, Storage,
};
use std::sync::Arc;

fn billing_config(switches: &[(&str, bool)]) -> Config {
    let mut config = config(
        r#"
application:
  name: billing
jobScheduler:
  enabled: false
  jobsEnabled:
    jobService-scanForJobs: true
"#,
    );
    for (key, on) in switches {
        config
            .job_scheduler
            .jobs_enabled
            .insert(key.to_string(), *on);
    }
    config
}

async fn jobs(storage: &dyn Storage) -> Vec<Job> {
    storage
        .find_jobs(&ADMIN_TENANT_ID, &JobFilter::default(), PageRequest::default())
        .await
        .unwrap()
}

fn named<'a>(jobs: &'a [Job], bean: &str, method: &str) -> &'a Job {
    let name = JobName::new(bean, method);
    jobs.iter().find(|j| j.name == name).unwrap()
}

/// Test: Declarations are created once, survive restarts, and removed ones are disabled.
#[tokio::test]
async fn test_restart_creates_and_obsoletes() {
    let (storage, dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let first = JobRegistry::new()
        .with(
            "reportService",
            "nightly",
            ScheduledJob::cron("0 0 2 * * *"),
            CountingWorkUnit::new(),
        )
        .with(
            "ledgerService",
            "sync",
            ScheduledJob::rate("PT5M"),
            CountingWorkUnit::new(),
        );
    let config = billing_config(&[("reportService-nightly", true), ("ledgerService-sync", true)]);

    let running = service::start(&config, Arc::clone(&storage), first).await.unwrap();
    assert_eq!(running.report().unwrap().created.len(), 3);
    let created = jobs(&*storage).await;
    assert_eq!(created.len(), 3);

    // Second process on the same database, with ledgerService.sync removed.
    let replica: Arc<dyn Storage> = Arc::new(open_replica(&dir).await);
    let second = JobRegistry::new().with(
        "reportService",
        "nightly",
        ScheduledJob::cron("0 0 2 * * *"),
        CountingWorkUnit::new(),
    );
    let config = billing_config(&[("reportService-nightly", true)]);

    let running = service::start(&config, Arc::clone(&replica), second).await.unwrap();
    let report = running.report().unwrap();
    assert!(report.created.is_empty());
    assert_eq!(report.obsoleted, vec![JobName::new("ledgerService", "sync")]);

    let after = jobs(&*replica).await;
    assert_eq!(after.len(), 3, "obsolete jobs are kept");
    let nightly_before = named(&created, "reportService", "nightly");
    let nightly_after = named(&after, "reportService", "nightly");
    assert_eq!(nightly_before.id, nightly_after.id);
    assert!(nightly_after.config_enabled);
    assert!(!named(&after, "ledgerService", "sync").config_enabled);
}

/// Test: Configuration switches flip config_enabled and leave user_enabled alone.
#[tokio::test]
async fn test_config_switch_preserves_operator_flag() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let registry = || {
        JobRegistry::new().with(
            "reportService",
            "nightly",
            ScheduledJob::delay("PT1H"),
            CountingWorkUnit::new(),
        )
    };

    service::start(
        &billing_config(&[("reportService-nightly", true)]),
        Arc::clone(&storage),
        registry(),
    )
    .await
    .unwrap();
    let job = named(&jobs(&*storage).await, "reportService", "nightly").clone();
    storage
        .set_user_enabled(&ADMIN_TENANT_ID, &job.id, false)
        .await
        .unwrap();

    let running = service::start(
        &billing_config(&[("reportService-nightly", false)]),
        Arc::clone(&storage),
        registry(),
    )
    .await
    .unwrap();
    assert_eq!(
        running.report().unwrap().config_disabled,
        vec![JobName::new("reportService", "nightly")]
    );
    let stored = storage.get_job(&ADMIN_TENANT_ID, &job.id).await.unwrap();
    assert!(!stored.config_enabled);
    assert!(!stored.user_enabled);

    let running = service::start(
        &billing_config(&[("reportService-nightly", true)]),
        Arc::clone(&storage),
        registry(),
    )
    .await
    .unwrap();
    assert_eq!(running.report().unwrap().config_enabled.len(), 1);
    let stored = storage.get_job(&ADMIN_TENANT_ID, &job.id).await.unwrap();
    assert!(stored.config_enabled);
    assert!(!stored.user_enabled, "operator flag is untouched");
}

/// Test: An invalid declaration stops startup before anything is written.
#[tokio::test]
async fn test_invalid_cron_is_fatal() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let registry = JobRegistry::new().with(
        "reportService",
        "nightly",
        ScheduledJob::cron("not a cron"),
        CountingWorkUnit::new(),
    );

    let err = service::start(
        &billing_config(&[("reportService-nightly", true)]),
        Arc::clone(&storage),
        registry,
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Registry(RegistryError::InvalidSchedule { .. })
    ));
    assert!(jobs(&*storage).await.is_empty());
}

/// Test: Two applications sharing a store reconcile independently.
#[tokio::test]
async fn test_applications_are_isolated() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);
    let registry = || {
        JobRegistry::new().with(
            "reportService",
            "nightly",
            ScheduledJob::delay("PT1H"),
            CountingWorkUnit::new(),
        )
    };

    let billing = billing_config(&[("reportService-nightly", true)]);
    let mut shipping = billing.clone();
    shipping.application.name = "shipping".into();

    service::start(&billing, Arc::clone(&storage), registry()).await.unwrap();
    let running = service::start(&shipping, Arc::clone(&storage), JobRegistry::new()).await;

    // shipping declares nothing but the reconciler; billing's jobs stay enabled.
    let report = running.unwrap();
    assert!(report.report().unwrap().obsoleted.is_empty());
    let all = jobs(&*storage).await;
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|j| j.config_enabled));
}
