// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # JobGroup
//!
//! Per-resource mutual exclusion with re-entrancy by owner. One group exists
//! per lockable resource (one per add-on container). A job may acquire the
//! group when it is free, when it already owns it, or when the current owner
//! is one of its ancestors (a nested call from the same call chain).
//!
//! Ownership is a stack: every successful `acquire` pushes the job, every
//! `release` must be issued by the job on top and pops it. The underlying
//! permit is returned only when the stack empties, so an outer operation keeps
//! exclusive access across all of its nested calls.

use crate::domain::job::{JobError, SupervisorJob};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Default)]
struct GroupState {
    owners: Vec<Uuid>,
    permit: Option<OwnedSemaphorePermit>,
}

pub struct JobGroup {
    name: String,
    semaphore: Arc<Semaphore>,
    state: Mutex<GroupState>,
}

impl JobGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(1)),
            state: Mutex::new(GroupState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_locked(&self) -> bool {
        !self.state.lock().owners.is_empty()
    }

    /// Job currently owning the group.
    pub fn owner(&self) -> Option<Uuid> {
        self.state.lock().owners.last().copied()
    }

    /// Nesting depth of the current ownership.
    pub fn depth(&self) -> usize {
        self.state.lock().owners.len()
    }

    pub fn can_acquire(&self, job: &SupervisorJob) -> bool {
        match self.owner() {
            None => true,
            Some(owner) => job.descends_from(owner),
        }
    }

    /// Acquires the group for `job`.
    ///
    /// Without `wait`, a group held by an unrelated job fails immediately with
    /// [`JobError::ExecutionLimitExceeded`].
    pub async fn acquire(&self, job: &SupervisorJob, wait: bool) -> Result<(), JobError> {
        {
            let mut state = self.state.lock();
            if let Some(owner) = state.owners.last().copied() {
                if job.descends_from(owner) {
                    state.owners.push(job.uuid());
                    debug!(group = %self.name, job = job.name(), depth = state.owners.len(), "Re-entered job group");
                    return Ok(());
                }
                if !wait {
                    return Err(self.limit_exceeded(job));
                }
            }
        }

        let permit = if wait {
            self.semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| self.limit_exceeded(job))?
        } else {
            self.semaphore
                .clone()
                .try_acquire_owned()
                .map_err(|_| self.limit_exceeded(job))?
        };

        let mut state = self.state.lock();
        state.owners = vec![job.uuid()];
        state.permit = Some(permit);
        debug!(group = %self.name, job = job.name(), "Acquired job group");
        Ok(())
    }

    /// Releases one level of ownership held by `job`. Ownership returns to the
    /// outer job when one exists; otherwise the group is freed.
    pub fn release(&self, job: &SupervisorJob) -> Result<(), JobError> {
        let mut state = self.state.lock();
        match state.owners.last() {
            Some(owner) if *owner == job.uuid() => {
                state.owners.pop();
                if state.owners.is_empty() {
                    state.permit = None;
                    debug!(group = %self.name, job = job.name(), "Released job group");
                }
                Ok(())
            }
            _ => Err(JobError::NotOwner {
                group: self.name.clone(),
                job: job.name().to_string(),
            }),
        }
    }

    /// Unconditionally frees the group, dropping every nested owner.
    pub fn force_release(&self) {
        let mut state = self.state.lock();
        if !state.owners.is_empty() {
            warn!(group = %self.name, depth = state.owners.len(), "Force releasing job group");
        }
        state.owners.clear();
        state.permit = None;
    }

    /// Scoped acquisition; the returned guard releases on drop.
    pub async fn acquire_context(
        &self,
        job: &SupervisorJob,
        wait: bool,
    ) -> Result<JobGroupGuard<'_>, JobError> {
        self.acquire(job, wait).await?;
        Ok(JobGroupGuard {
            group: self,
            job: job.clone(),
        })
    }

    fn limit_exceeded(&self, job: &SupervisorJob) -> JobError {
        JobError::ExecutionLimitExceeded {
            group: self.name.clone(),
            job: job.name().to_string(),
        }
    }
}

impl std::fmt::Debug for JobGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobGroup")
            .field("name", &self.name)
            .field("owner", &self.owner())
            .finish()
    }
}

#[must_use = "the group is released as soon as the guard is dropped"]
pub struct JobGroupGuard<'a> {
    group: &'a JobGroup,
    job: SupervisorJob,
}

impl Drop for JobGroupGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.group.release(&self.job) {
            warn!("Job group guard release failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reentrant_acquire_and_release() {
        let group = JobGroup::new("addon_test");
        let job = SupervisorJob::detached("job");

        group.acquire(&job, false).await.unwrap();
        group.acquire(&job, false).await.unwrap();
        assert_eq!(group.depth(), 2);

        group.release(&job).unwrap();
        assert!(group.is_locked());
        group.release(&job).unwrap();
        assert!(!group.is_locked());
        assert_eq!(group.depth(), 0);

        let err = group.release(&job).unwrap_err();
        assert!(matches!(err, JobError::NotOwner { .. }));
    }

    #[tokio::test]
    async fn test_other_job_fails_without_wait() {
        let group = JobGroup::new("addon_test");
        let first = SupervisorJob::detached("first");
        let second = SupervisorJob::detached("second");

        group.acquire(&first, false).await.unwrap();
        assert!(!group.can_acquire(&second));

        let err = group.acquire(&second, false).await.unwrap_err();
        assert!(matches!(err, JobError::ExecutionLimitExceeded { .. }));
        assert_eq!(group.owner(), Some(first.uuid()));
    }

    #[tokio::test]
    async fn test_waiting_job_acquires_after_release() {
        let group = Arc::new(JobGroup::new("addon_test"));
        let first = SupervisorJob::detached("first");
        let second = SupervisorJob::detached("second");

        group.acquire(&first, false).await.unwrap();

        let waiter = {
            let group = group.clone();
            let second = second.clone();
            tokio::spawn(async move { group.acquire(&second, true).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(group.owner(), Some(first.uuid()));

        group.release(&first).unwrap();
        waiter.await.unwrap().unwrap();
        assert_eq!(group.owner(), Some(second.uuid()));
    }

    #[tokio::test]
    async fn test_child_job_reenters_and_returns_ownership() {
        let group = JobGroup::new("addon_test");
        let parent = SupervisorJob::detached("restart");
        group.acquire(&parent, false).await.unwrap();

        parent
            .scope(async {
                let child = SupervisorJob::detached("stop");
                group.acquire(&child, false).await.unwrap();
                assert_eq!(group.owner(), Some(child.uuid()));

                // The parent cannot release while the child holds the top.
                assert!(group.release(&parent).is_err());
                group.release(&child).unwrap();
            })
            .await;

        assert_eq!(group.owner(), Some(parent.uuid()));
        group.release(&parent).unwrap();
        assert!(!group.is_locked());
    }

    #[tokio::test]
    async fn test_guard_releases_on_error_path() {
        let group = JobGroup::new("addon_test");
        let job = SupervisorJob::detached("guarded");

        let result: Result<(), &str> = async {
            let _guard = group.acquire_context(&job, false).await.unwrap();
            Err("docker failed")
        }
        .await;

        assert!(result.is_err());
        assert!(!group.is_locked());
    }

    #[tokio::test]
    async fn test_force_release_clears_nesting() {
        let group = JobGroup::new("addon_test");
        let job = SupervisorJob::detached("job");
        group.acquire(&job, false).await.unwrap();
        group.acquire(&job, false).await.unwrap();

        group.force_release();
        assert!(!group.is_locked());

        let other = SupervisorJob::detached("other");
        group.acquire(&other, false).await.unwrap();
    }
}
