//! Claim exclusivity across replicas sharing one store.

use crate::common::{open_replica, sqlite_storage};
use chrono::Utc;
use jobsched::testing::due_job;
use jobsched::{ADMIN_TENANT_ID, Storage};
use std::collections::HashSet;
use std::sync::Arc;

/// Test: Two replicas racing on one database never claim the same job.
#[tokio::test]
async fn test_replicas_claim_each_job_once() {
    let (first, dir) = sqlite_storage().await;
    let second = open_replica(&dir).await;
    let replicas: [Arc<dyn Storage>; 2] = [Arc::new(first), Arc::new(second)];

    let mut expected = HashSet::new();
    for i in 0..20 {
        let job = due_job("billing", "invoiceService", &format!("run{}", i));
        expected.insert(job.id);
        replicas[0].save_job(job).await.unwrap();
    }

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let storage = Arc::clone(&replicas[worker % 2]);
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = storage.pop_for_execution().await.unwrap() {
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut claimed = Vec::new();
    for task in tasks {
        claimed.extend(task.await.unwrap());
    }

    assert_eq!(claimed.len(), 20, "every job claimed exactly once");
    assert_eq!(claimed.into_iter().collect::<HashSet<_>>(), expected);
}

/// Test: A claimed job is not claimable again until its run is written back.
#[tokio::test]
async fn test_claimed_job_is_serial() {
    let (storage, _dir) = sqlite_storage().await;
    let job = due_job("billing", "invoiceService", "send");
    storage.save_job(job.clone()).await.unwrap();

    let mut claimed = storage.pop_for_execution().await.unwrap().unwrap();
    assert_eq!(claimed.id, job.id);
    assert!(claimed.job_execution_id.is_some());
    assert!(claimed.popped_for_execution.is_some());

    // Still overdue, but in flight.
    assert!(storage.pop_for_execution().await.unwrap().is_none());
    assert_eq!(storage.find_next_execution_time().await.unwrap(), None);

    claimed.register_completed_successfully(Utc::now()).unwrap();
    storage.save_job(claimed).await.unwrap();

    let stored = storage.get_job(&ADMIN_TENANT_ID, &job.id).await.unwrap();
    assert!(!stored.is_in_flight());
    assert_eq!(stored.execution_count, 1);
    assert!(stored.next_execution.unwrap() > Utc::now());
    assert!(storage.pop_for_execution().await.unwrap().is_none());
}

/// Test: Disabled jobs are never claimed, whichever flag is off.
#[tokio::test]
async fn test_disabled_jobs_are_not_claimed() {
    let (storage, _dir) = sqlite_storage().await;
    let by_config = due_job("billing", "a", "run");
    let by_user = due_job("billing", "b", "run");
    storage.save_job(by_config.clone()).await.unwrap();
    storage.save_job(by_user.clone()).await.unwrap();

    storage
        .set_config_enabled(&ADMIN_TENANT_ID, &by_config.id, false)
        .await
        .unwrap();
    storage
        .set_user_enabled(&ADMIN_TENANT_ID, &by_user.id, false)
        .await
        .unwrap();

    assert!(storage.pop_for_execution().await.unwrap().is_none());
}
