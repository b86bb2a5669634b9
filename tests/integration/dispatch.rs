//! Dispatch loop integration tests over a SQLite store.

use crate::common::{sqlite_storage, wait_for_executions};
use jobsched::testing::{
    CountingWorkUnit, FailingWorkUnit, PanickingWorkUnit, SlowWorkUnit, due_job,
};
use jobsched::{
    ADMIN_TENANT_ID, JobExecutor, JobRegistry, PageRequest, ScheduledJob, Scheduler,
    SchedulerExit, SchedulerState, Storage,
};
use std::sync::Arc;
use std::time::Duration;

fn scheduler(
    storage: Arc<dyn Storage>,
    registry: JobRegistry,
    max_parallel_jobs: usize,
) -> Scheduler {
    let executor = Arc::new(JobExecutor::new(Arc::clone(&storage), Arc::new(registry)));
    Scheduler::new(storage, executor, max_parallel_jobs)
        .with_poll_interval(Duration::from_millis(50))
}

/// Test: Due jobs run once each, outcomes are recorded, then the loop exits idle.
#[tokio::test]
async fn test_due_jobs_run_and_are_recorded() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let ok = CountingWorkUnit::new();
    let registry = JobRegistry::new()
        .with("reportService", "nightly", ScheduledJob::delay("PT1H"), ok.clone())
        .with(
            "ledgerService",
            "sync",
            ScheduledJob::delay("PT1H"),
            FailingWorkUnit::with_error(1, "ledger unavailable"),
        );
    let report = due_job("billing", "reportService", "nightly");
    let ledger = due_job("billing", "ledgerService", "sync");
    storage.save_job(report.clone()).await.unwrap();
    storage.save_job(ledger.clone()).await.unwrap();

    let (_handle, task) = scheduler(Arc::clone(&storage), registry, 2)
        .with_exit_when_idle(true)
        .start();
    let exit = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exit, SchedulerExit::Idle);
    assert_eq!(ok.count(), 1);

    let report_runs = wait_for_executions(&*storage, &report.id, 1, Duration::from_secs(1)).await;
    assert!(report_runs[0].success);

    let ledger_runs = wait_for_executions(&*storage, &ledger.id, 1, Duration::from_secs(1)).await;
    assert!(!ledger_runs[0].success);
    assert!(
        ledger_runs[0]
            .stack_trace
            .as_deref()
            .unwrap()
            .contains("ledger unavailable")
    );

    let stored = storage.get_job(&ADMIN_TENANT_ID, &ledger.id).await.unwrap();
    assert!(!stored.is_in_flight());
    assert_eq!(stored.execution_count, 1);
    assert!(stored.last_failed_execution.is_some());
    assert!(stored.next_execution.is_some());
}

/// Test: No more than `max_parallel_jobs` jobs run at once.
#[tokio::test]
async fn test_parallelism_is_capped() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let slow = SlowWorkUnit::new(Duration::from_millis(100));
    let mut registry = JobRegistry::new();
    for i in 0..6 {
        let method = format!("run{}", i);
        registry.register(
            "slowService",
            method.as_str(),
            ScheduledJob::delay("PT1H"),
            slow.clone(),
        );
        storage
            .save_job(due_job("billing", "slowService", &method))
            .await
            .unwrap();
    }

    let (_handle, task) = scheduler(Arc::clone(&storage), registry, 2)
        .with_exit_when_idle(true)
        .start();
    let exit = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exit, SchedulerExit::Idle);
    assert_eq!(slow.completed(), 6);
    assert!(slow.max_running() <= 2, "saw {} concurrent runs", slow.max_running());
    let executions = storage
        .find_executions(&ADMIN_TENANT_ID, Some(true), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(executions.len(), 6);
}

/// Test: A panicking work unit does not take the loop or other jobs down.
#[tokio::test]
async fn test_panicking_job_is_isolated() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let ok = CountingWorkUnit::new();
    let registry = JobRegistry::new()
        .with(
            "brokenService",
            "run",
            ScheduledJob::delay("PT1H"),
            PanickingWorkUnit::new("index out of bounds"),
        )
        .with("reportService", "nightly", ScheduledJob::delay("PT1H"), ok.clone());
    let broken = due_job("billing", "brokenService", "run");
    storage.save_job(broken.clone()).await.unwrap();
    storage
        .save_job(due_job("billing", "reportService", "nightly"))
        .await
        .unwrap();

    let (_handle, task) = scheduler(Arc::clone(&storage), registry, 1)
        .with_exit_when_idle(true)
        .start();
    let exit = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exit.exit_code(), 0);
    assert_eq!(ok.count(), 1);
    let runs = wait_for_executions(&*storage, &broken.id, 1, Duration::from_secs(1)).await;
    assert!(!runs[0].success);
    assert!(runs[0].stack_trace.as_deref().unwrap().contains("index out of bounds"));
}

/// Test: Shutdown waits for the running job before resolving.
#[tokio::test]
async fn test_shutdown_drains_running_jobs() {
    let (storage, _dir) = sqlite_storage().await;
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let slow = SlowWorkUnit::new(Duration::from_millis(300));
    let registry =
        JobRegistry::new().with("slowService", "run", ScheduledJob::delay("PT1H"), slow.clone());
    let job = due_job("billing", "slowService", "run");
    storage.save_job(job.clone()).await.unwrap();

    let (handle, task) = scheduler(Arc::clone(&storage), registry, 1).start();
    while slow.running() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    handle.shutdown().await.unwrap();

    assert_eq!(slow.completed(), 1);
    assert_eq!(handle.state().await, SchedulerState::Stopped);
    assert_eq!(task.await.unwrap(), SchedulerExit::Shutdown);
    let stored = storage.get_job(&ADMIN_TENANT_ID, &job.id).await.unwrap();
    assert!(!stored.is_in_flight());
}
