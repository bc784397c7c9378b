// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::sync::Arc;
use std::time::Duration;
use supervisor_core::application::job_manager::JobManager;
use supervisor_core::domain::job::JobError;
use supervisor_core::domain::job_group::JobGroup;
use tokio::time::timeout;

#[tokio::test]
async fn test_reentrant_depth_and_third_release() {
    let jobs = JobManager::in_memory();
    let group = JobGroup::new("addon_local_ssh");
    let job = jobs.new_job("addon_restart", Some("local_ssh".into()));

    group.acquire(&job, false).await.unwrap();
    group.acquire(&job, false).await.unwrap();
    group.release(&job).unwrap();
    group.release(&job).unwrap();
    assert_eq!(group.depth(), 0);
    assert!(!group.is_locked());

    assert!(matches!(group.release(&job), Err(JobError::NotOwner { .. })));
}

#[tokio::test]
async fn test_child_job_reenters_parent_group() {
    let jobs = JobManager::in_memory();
    let group = JobGroup::new("addon_local_ssh");
    let parent = jobs.new_job("addon_restart", Some("local_ssh".into()));
    group.acquire(&parent, false).await.unwrap();

    let depth = parent
        .scope(async {
            let child = jobs.new_job("addon_stop", Some("local_ssh".into()));
            assert_eq!(child.parent_id(), Some(parent.uuid()));
            group.acquire(&child, false).await.unwrap();
            let depth = group.depth();
            group.release(&child).unwrap();
            depth
        })
        .await;
    assert_eq!(depth, 2);
    assert_eq!(group.owner(), Some(parent.uuid()));

    group.release(&parent).unwrap();
    assert!(!group.is_locked());
}

#[tokio::test]
async fn test_unrelated_job_is_rejected_or_waits() {
    let jobs = Arc::new(JobManager::in_memory());
    let group = Arc::new(JobGroup::new("addon_local_ssh"));
    let first = jobs.new_job("addon_backup", Some("local_ssh".into()));
    let second = jobs.new_job("addon_update", Some("local_ssh".into()));

    group.acquire(&first, false).await.unwrap();
    assert!(matches!(
        group.acquire(&second, false).await,
        Err(JobError::ExecutionLimitExceeded { .. })
    ));

    let waiter = {
        let group = group.clone();
        let second = second.clone();
        tokio::spawn(async move {
            group.acquire(&second, true).await.unwrap();
            group.owner()
        })
    };

    // Still blocked while the first job holds the group.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    group.release(&first).unwrap();
    let owner = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    assert_eq!(owner, Some(second.uuid()));
    group.release(&second).unwrap();
}

#[tokio::test]
async fn test_named_jobs_are_shared_until_done() {
    let jobs = JobManager::in_memory();
    let first = jobs.get_job("addon_manager_install");
    let again = jobs.get_job("addon_manager_install");
    assert_eq!(first.uuid(), again.uuid());

    first.finish();
    let next = jobs.get_job("addon_manager_install");
    assert_ne!(first.uuid(), next.uuid());
}
