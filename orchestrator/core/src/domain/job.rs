// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Supervisor Jobs
//!
//! A [`SupervisorJob`] is a tracked, named asynchronous operation. Jobs are
//! registered in the `JobManager` while they run and drop out of it once their
//! progress reaches 100.
//!
//! Nested operations (for example `restart` calling `stop` then `start`) are
//! linked through a task-local *lineage*: a job created while another job's
//! [`SupervisorJob::scope`] is active records that job as an ancestor. The
//! [`JobGroup`](crate::domain::job_group::JobGroup) uses the lineage to let a
//! call chain re-enter a lock it already holds.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use thiserror::Error;
use uuid::Uuid;

tokio::task_local! {
    static JOB_LINEAGE: Vec<Uuid>;
}

/// Jobs currently registered, keyed by uuid.
pub(crate) type JobTable = RwLock<HashMap<Uuid, SupervisorJob>>;

/// Preconditions a guarded operation may require before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCondition {
    FreeSpace,
    Healthy,
    InternetHost,
    Running,
    Supported,
}

impl fmt::Display for JobCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::FreeSpace => "free_space",
            Self::Healthy => "healthy",
            Self::InternetHost => "internet_host",
            Self::Running => "running",
            Self::Supported => "supported",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Job '{job}' can't execute, group '{group}' is already running another job")]
    ExecutionLimitExceeded { group: String, job: String },

    #[error("Job '{job}' does not own group '{group}'")]
    NotOwner { group: String, job: String },

    #[error("'{job}' blocked by condition {condition}: {reason}")]
    ConditionFailed {
        job: String,
        condition: JobCondition,
        reason: String,
    },
}

/// Point-in-time view of a job, used for logging and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub uuid: Uuid,
    pub name: String,
    pub reference: Option<String>,
    pub progress: u8,
    pub stage: Option<String>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub done: bool,
}

#[derive(Debug, Default)]
struct JobProgress {
    progress: u8,
    stage: Option<String>,
    done: bool,
}

struct JobInner {
    uuid: Uuid,
    name: String,
    reference: Option<String>,
    ancestors: Vec<Uuid>,
    created_at: DateTime<Utc>,
    progress: Mutex<JobProgress>,
    registry: Weak<JobTable>,
}

/// Handle to a running job. Clones share the same job.
#[derive(Clone)]
pub struct SupervisorJob {
    inner: Arc<JobInner>,
}

impl SupervisorJob {
    /// Creates a job whose ancestors are the jobs active on the current task.
    pub(crate) fn new(name: impl Into<String>, reference: Option<String>, registry: Weak<JobTable>) -> Self {
        Self {
            inner: Arc::new(JobInner {
                uuid: Uuid::new_v4(),
                name: name.into(),
                reference,
                ancestors: current_lineage(),
                created_at: Utc::now(),
                progress: Mutex::new(JobProgress::default()),
                registry,
            }),
        }
    }

    /// Creates a job that is not tracked by any manager.
    pub fn detached(name: impl Into<String>) -> Self {
        Self::new(name, None, Weak::new())
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn reference(&self) -> Option<&str> {
        self.inner.reference.as_deref()
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        self.inner.ancestors.last().copied()
    }

    /// True if `uuid` is this job or one of the jobs it was started under.
    pub fn descends_from(&self, uuid: Uuid) -> bool {
        self.inner.uuid == uuid || self.inner.ancestors.contains(&uuid)
    }

    pub fn progress(&self) -> u8 {
        self.inner.progress.lock().progress
    }

    pub fn stage(&self) -> Option<String> {
        self.inner.progress.lock().stage.clone()
    }

    pub fn is_done(&self) -> bool {
        self.inner.progress.lock().done
    }

    /// Updates progress and stage. Reaching 100 completes the job and removes
    /// it from the manager.
    pub fn update(&self, progress: Option<u8>, stage: Option<&str>) {
        let finished = {
            let mut state = self.inner.progress.lock();
            if let Some(progress) = progress {
                state.progress = progress.min(100);
            }
            if let Some(stage) = stage {
                state.stage = Some(stage.to_string());
            }
            if state.progress >= 100 {
                state.done = true;
            }
            state.done
        };

        if finished {
            self.unregister();
        }
    }

    /// Marks the job complete regardless of reported progress.
    pub fn finish(&self) {
        self.update(Some(100), None);
    }

    pub(crate) fn unregister(&self) {
        if let Some(registry) = self.inner.registry.upgrade() {
            registry.write().remove(&self.inner.uuid);
        }
    }

    /// Runs `fut` with this job as the innermost entry of the task lineage.
    pub async fn scope<F: Future>(&self, fut: F) -> F::Output {
        let mut lineage = self.inner.ancestors.clone();
        lineage.push(self.inner.uuid);
        JOB_LINEAGE.scope(lineage, fut).await
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.inner.progress.lock();
        JobSnapshot {
            uuid: self.inner.uuid,
            name: self.inner.name.clone(),
            reference: self.inner.reference.clone(),
            progress: state.progress,
            stage: state.stage.clone(),
            parent_id: self.parent_id(),
            created_at: self.inner.created_at,
            done: state.done,
        }
    }
}

impl fmt::Debug for SupervisorJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupervisorJob")
            .field("uuid", &self.inner.uuid)
            .field("name", &self.inner.name)
            .field("reference", &self.inner.reference)
            .finish()
    }
}

impl PartialEq for SupervisorJob {
    fn eq(&self, other: &Self) -> bool {
        self.inner.uuid == other.inner.uuid
    }
}

/// Uuids of the jobs active on the current task, outermost first.
pub fn current_lineage() -> Vec<Uuid> {
    JOB_LINEAGE.try_with(|lineage| lineage.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_nested_job_records_parent() {
        let outer = SupervisorJob::detached("outer");
        let inner = outer
            .scope(async { SupervisorJob::detached("inner") })
            .await;

        assert_eq!(inner.parent_id(), Some(outer.uuid()));
        assert!(inner.descends_from(outer.uuid()));
        assert!(!outer.descends_from(inner.uuid()));
    }

    #[tokio::test]
    async fn test_job_outside_scope_has_no_parent() {
        let job = SupervisorJob::detached("standalone");
        assert_eq!(job.parent_id(), None);
        assert!(current_lineage().is_empty());
    }

    #[test]
    fn test_update_caps_progress_and_completes() {
        let job = SupervisorJob::detached("progress");
        job.update(Some(40), Some("pulling"));
        assert_eq!(job.progress(), 40);
        assert_eq!(job.stage().as_deref(), Some("pulling"));
        assert!(!job.is_done());

        job.update(Some(250), None);
        assert_eq!(job.progress(), 100);
        assert!(job.is_done());
    }
}
