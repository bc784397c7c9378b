// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Job Manager Application Service
//!
//! Registry of running [`SupervisorJob`]s plus the persisted
//! `ignore_conditions` list read by the condition checker.
//!
//! Two ways to obtain a job:
//! - [`JobManager::get_job`] is get-or-create by name. Callers choosing the
//!   same name share progress and stage; such jobs are for observability only.
//! - [`JobManager::new_job`] always creates a fresh job. Lock ownership in a
//!   [`JobGroup`](crate::domain::job_group::JobGroup) is only ever taken with
//!   these, so name collisions never share a lock.

use crate::domain::job::{current_lineage, JobCondition, JobSnapshot, JobTable, SupervisorJob};
use crate::domain::repository::StoreError;
use crate::infrastructure::json_file::{read_json_or_default, write_json_atomic};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// On-disk shape of `jobs.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JobsDataFile {
    #[serde(default)]
    ignore_conditions: Vec<JobCondition>,
}

pub struct JobManager {
    table: Arc<JobTable>,
    named: RwLock<HashMap<String, SupervisorJob>>,
    ignore_conditions: RwLock<Vec<JobCondition>>,
    path: Option<PathBuf>,
}

impl JobManager {
    /// Loads `jobs.json` from `path`. A missing file starts with no ignored
    /// conditions.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data: JobsDataFile = read_json_or_default(&path)?;
        if !data.ignore_conditions.is_empty() {
            info!("Job conditions ignored by configuration: {:?}", data.ignore_conditions);
        }
        Ok(Self {
            table: Arc::new(JobTable::default()),
            named: RwLock::new(HashMap::new()),
            ignore_conditions: RwLock::new(data.ignore_conditions),
            path: Some(path),
        })
    }

    /// Manager without a backing file.
    pub fn in_memory() -> Self {
        Self {
            table: Arc::new(JobTable::default()),
            named: RwLock::new(HashMap::new()),
            ignore_conditions: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Returns the running job called `name`, creating it if none is running.
    pub fn get_job(&self, name: &str) -> SupervisorJob {
        let mut named = self.named.write();
        if let Some(job) = named.get(name) {
            if !job.is_done() {
                return job.clone();
            }
        }

        let job = self.register(name, None);
        named.insert(name.to_string(), job.clone());
        job
    }

    /// Creates and registers a job that is never shared with other callers.
    pub fn new_job(&self, name: &str, reference: Option<String>) -> SupervisorJob {
        self.register(name, reference)
    }

    fn register(&self, name: &str, reference: Option<String>) -> SupervisorJob {
        let job = SupervisorJob::new(name, reference, Arc::downgrade(&self.table));
        debug!(job = name, uuid = %job.uuid(), parent = ?job.parent_id(), "Registered job");
        self.table.write().insert(job.uuid(), job.clone());
        job
    }

    /// Drops `job` from the registry without completing it.
    pub fn remove_job(&self, job: &SupervisorJob) {
        job.unregister();
        self.named.write().retain(|_, named| named != job);
    }

    pub fn get(&self, uuid: uuid::Uuid) -> Option<SupervisorJob> {
        self.table.read().get(&uuid).cloned()
    }

    /// Innermost job active on the current task, if it is registered here.
    pub fn current(&self) -> Option<SupervisorJob> {
        current_lineage().last().and_then(|uuid| self.get(*uuid))
    }

    pub fn jobs(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self.table.read().values().map(SupervisorJob::snapshot).collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    pub fn ignore_conditions(&self) -> Vec<JobCondition> {
        self.ignore_conditions.read().clone()
    }

    pub fn is_ignored(&self, condition: JobCondition) -> bool {
        self.ignore_conditions.read().contains(&condition)
    }

    /// Replaces the ignored conditions and saves `jobs.json`.
    pub fn set_ignore_conditions(&self, requested: Vec<JobCondition>) -> Result<(), StoreError> {
        let mut conditions = Vec::with_capacity(requested.len());
        for condition in requested {
            if !conditions.contains(&condition) {
                conditions.push(condition);
            }
        }
        if let Some(path) = &self.path {
            write_json_atomic(
                path,
                &JobsDataFile {
                    ignore_conditions: conditions.clone(),
                },
            )?;
        }
        info!("Ignored job conditions set to {:?}", conditions);
        *self.ignore_conditions.write() = conditions;
        Ok(())
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_job_is_shared_by_name() {
        let manager = JobManager::in_memory();
        let a = manager.get_job("addon_manager_install");
        let b = manager.get_job("addon_manager_install");
        assert_eq!(a, b);

        b.update(Some(30), Some("pulling"));
        assert_eq!(a.progress(), 30);
        assert_eq!(manager.jobs().len(), 1);
    }

    #[test]
    fn test_new_job_is_unique() {
        let manager = JobManager::in_memory();
        let a = manager.new_job("addon_start", Some("local_ssh".into()));
        let b = manager.new_job("addon_start", Some("local_ssh".into()));
        assert_ne!(a, b);
        assert_eq!(manager.jobs().len(), 2);
    }

    #[test]
    fn test_job_leaves_registry_at_100() {
        let manager = JobManager::in_memory();
        let job = manager.get_job("repair");
        job.update(Some(100), None);
        assert!(manager.jobs().is_empty());

        // A finished job is replaced on the next lookup.
        let next = manager.get_job("repair");
        assert_ne!(job, next);
        assert!(!next.is_done());
    }

    #[test]
    fn test_remove_job() {
        let manager = JobManager::in_memory();
        let job = manager.get_job("backup");
        manager.remove_job(&job);
        assert!(manager.get(job.uuid()).is_none());
        assert_ne!(manager.get_job("backup"), job);
    }

    #[tokio::test]
    async fn test_current_job_follows_scope() {
        let manager = JobManager::in_memory();
        let job = manager.new_job("addon_restart", None);
        assert!(manager.current().is_none());
        let current = job.scope(async { manager.current() }).await;
        assert_eq!(current, Some(job));
    }

    #[test]
    fn test_ignore_conditions_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");

        let manager = JobManager::load(&path).unwrap();
        assert!(manager.ignore_conditions().is_empty());
        manager
            .set_ignore_conditions(vec![JobCondition::FreeSpace, JobCondition::Healthy])
            .unwrap();

        let reloaded = JobManager::load(&path).unwrap();
        assert!(reloaded.is_ignored(JobCondition::FreeSpace));
        assert!(reloaded.is_ignored(JobCondition::Healthy));
        assert!(!reloaded.is_ignored(JobCondition::InternetHost));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("free_space"));
    }
}
