// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Preconditions for guarded operations.
//!
//! A condition listed in the job manager's `ignore_conditions` is skipped
//! with a warning; any other unmet condition blocks the job.

use crate::application::job_manager::JobManager;
use crate::application::resolution::ResolutionCenter;
use crate::domain::core_state::{CoreState, CoreStateHandle};
use crate::domain::host::HostProbe;
use crate::domain::job::{JobCondition, JobError, SupervisorJob};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

pub struct ConditionChecker {
    jobs: Arc<JobManager>,
    resolution: Arc<ResolutionCenter>,
    host: Arc<dyn HostProbe>,
    core_state: CoreStateHandle,
    data_path: PathBuf,
    min_free_space: u64,
}

impl ConditionChecker {
    pub fn new(
        jobs: Arc<JobManager>,
        resolution: Arc<ResolutionCenter>,
        host: Arc<dyn HostProbe>,
        core_state: CoreStateHandle,
        data_path: PathBuf,
        min_free_space: u64,
    ) -> Self {
        Self {
            jobs,
            resolution,
            host,
            core_state,
            data_path,
            min_free_space,
        }
    }

    pub async fn ensure(&self, job: &SupervisorJob, conditions: &[JobCondition]) -> Result<(), JobError> {
        for condition in conditions {
            let Some(reason) = self.check(*condition).await else {
                continue;
            };

            if self.jobs.is_ignored(*condition) {
                warn!(
                    job = job.name(),
                    condition = %condition,
                    "Ignoring unmet job condition: {}", reason
                );
                continue;
            }

            return Err(JobError::ConditionFailed {
                job: job.name().to_string(),
                condition: *condition,
                reason,
            });
        }
        Ok(())
    }

    /// Returns why `condition` is unmet, or `None` when it holds.
    async fn check(&self, condition: JobCondition) -> Option<String> {
        match condition {
            JobCondition::FreeSpace => match self.host.free_space(&self.data_path).await {
                Ok(free) if free < self.min_free_space => Some(format!(
                    "only {:.1} GiB free on {}",
                    free as f64 / 1024f64.powi(3),
                    self.data_path.display()
                )),
                Ok(_) => None,
                Err(e) => {
                    warn!("Can't read free space of {:?}: {}", self.data_path, e);
                    None
                }
            },
            JobCondition::Healthy => (!self.resolution.is_healthy())
                .then(|| format!("system is unhealthy: {:?}", self.resolution.unhealthy())),
            JobCondition::InternetHost => (!self.host.internet_connectivity().await)
                .then(|| "no internet connection".to_string()),
            JobCondition::Running => {
                let state = self.core_state.get();
                (state != CoreState::Running).then(|| format!("supervisor is in state {}", state))
            }
            JobCondition::Supported => (!self.resolution.is_supported())
                .then(|| format!("system is unsupported: {:?}", self.resolution.unsupported())),
        }
    }
}
