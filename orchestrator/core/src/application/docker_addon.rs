// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Docker handle of one installed add-on.
//!
//! Owns the add-on's [`JobGroup`]: every container operation runs as a job
//! holding the group, so run/stop/remove are never issued concurrently for
//! the same container. Nested calls made from a job that already holds the
//! group re-enter it.

use crate::application::job_manager::JobManager;
use crate::domain::job::SupervisorJob;
use crate::domain::job_group::JobGroup;
use crate::domain::runtime::{
    CommandResult, ContainerMetadata, ContainerRuntime, ContainerSpec, ContainerStats, RuntimeError,
};
use crate::domain::addon::AddonError;
use std::future::Future;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Completes the job when dropped, so a cancelled operation leaves no
/// stale job behind.
struct FinishOnDrop(SupervisorJob);

impl Drop for FinishOnDrop {
    fn drop(&mut self) {
        self.0.finish();
    }
}

pub struct DockerAddon {
    slug: String,
    name: String,
    runtime: Arc<dyn ContainerRuntime>,
    jobs: Arc<JobManager>,
    group: JobGroup,
}

impl DockerAddon {
    pub fn new(slug: &str, runtime: Arc<dyn ContainerRuntime>, jobs: Arc<JobManager>) -> Self {
        let name = container_name(slug);
        Self {
            slug: slug.to_string(),
            group: JobGroup::new(name.clone()),
            name,
            runtime,
            jobs,
        }
    }

    /// Container name, `addon_<slug>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &JobGroup {
        &self.group
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Runs `operation` as a new job holding this add-on's group.
    ///
    /// Fails with `ExecutionLimitExceeded` when an unrelated job holds the
    /// group, unless `wait` is set.
    pub async fn guarded<T, F, Fut>(&self, job_name: &str, wait: bool, operation: F) -> Result<T, AddonError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AddonError>>,
    {
        let job = FinishOnDrop(self.jobs.new_job(job_name, Some(self.slug.clone())));
        let _guard = self.group.acquire_context(&job.0, wait).await?;
        job.0.scope(operation()).await
    }

    async fn docker<T, F, Fut>(&self, job_name: &str, operation: F) -> Result<T, AddonError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, RuntimeError>>,
    {
        self.guarded(job_name, false, move || async move {
            operation().await.map_err(|e| AddonError::docker(&self.slug, e))
        })
        .await
    }

    pub async fn attach(&self, image: &str, version: &str) -> Result<ContainerMetadata, RuntimeError> {
        self.runtime.attach(&self.name, image, version).await
    }

    pub async fn install(&self, image: &str, version: &str) -> Result<(), AddonError> {
        self.docker("docker_addon_install", || self.runtime.install(image, version))
            .await
    }

    pub async fn build(&self, context: &Path, image: &str, version: &str) -> Result<(), AddonError> {
        self.docker("docker_addon_build", || self.runtime.build(context, image, version))
            .await
    }

    pub async fn run(&self, spec: &ContainerSpec) -> Result<(), AddonError> {
        self.docker("docker_addon_run", || async {
            // A leftover container with the same name blocks the new one.
            match self.runtime.stop(&self.name, true).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            self.runtime.run(spec).await
        })
        .await
    }

    /// Stops the container. A container that does not exist counts as
    /// stopped.
    pub async fn stop(&self, remove_container: bool) -> Result<(), AddonError> {
        self.docker("docker_addon_stop", || async {
            match self.runtime.stop(&self.name, remove_container).await {
                Err(RuntimeError::NotFound(_)) => {
                    debug!("No container {} to stop", self.name);
                    Ok(())
                }
                other => other,
            }
        })
        .await
    }

    pub async fn remove_image(&self, image: &str, version: &str) -> Result<(), AddonError> {
        self.docker("docker_addon_remove", || async {
            match self.runtime.remove_image(image, version).await {
                Err(RuntimeError::NotFound(_)) => Ok(()),
                other => other,
            }
        })
        .await
    }

    pub async fn is_running(&self) -> Result<bool, RuntimeError> {
        self.runtime.is_running(&self.name).await
    }

    /// True if the image the container is created from is present.
    pub async fn exists(&self, image: &str, version: &str) -> Result<bool, RuntimeError> {
        self.runtime.image_exists(image, version).await
    }

    pub async fn stats(&self) -> Result<ContainerStats, RuntimeError> {
        self.runtime.stats(&self.name).await
    }

    pub async fn logs(&self) -> Result<Vec<u8>, RuntimeError> {
        self.runtime.logs(&self.name).await
    }

    pub async fn write_stdin(&self, data: &[u8]) -> Result<(), RuntimeError> {
        self.runtime.write_stdin(&self.name, data).await
    }

    pub async fn run_inside(&self, command: &str) -> Result<CommandResult, RuntimeError> {
        self.runtime.run_inside(&self.name, command).await
    }

    pub async fn export_image(&self, image: &str, version: &str, target: &Path) -> Result<(), RuntimeError> {
        self.runtime.export_image(image, version, target).await
    }

    pub async fn import_image(&self, source: &Path) -> Result<(), AddonError> {
        self.docker("docker_addon_import", || self.runtime.import_image(source))
            .await
    }

    pub async fn ip_address(&self) -> Result<Option<IpAddr>, RuntimeError> {
        self.runtime.ip_address(&self.name).await
    }
}

pub fn container_name(slug: &str) -> String {
    format!("addon_{}", slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobError;
    use crate::infrastructure::memory_runtime::InMemoryContainerRuntime;

    fn addon(runtime: Arc<InMemoryContainerRuntime>) -> (DockerAddon, Arc<JobManager>) {
        let jobs = Arc::new(JobManager::in_memory());
        (DockerAddon::new("local_ssh", runtime, jobs.clone()), jobs)
    }

    #[tokio::test]
    async fn test_stop_missing_container_is_ok() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let (docker, _) = addon(runtime.clone());
        docker.stop(true).await.unwrap();
        assert_eq!(runtime.call_count("stop"), 1);
        assert!(!docker.group().is_locked());
    }

    #[tokio::test]
    async fn test_busy_group_rejects_unrelated_job() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let (docker, jobs) = addon(runtime.clone());

        let holder = jobs.new_job("addon_backup", Some("local_ssh".into()));
        docker.group().acquire(&holder, false).await.unwrap();

        let err = docker.stop(true).await.unwrap_err();
        assert!(matches!(
            err,
            AddonError::Job(JobError::ExecutionLimitExceeded { .. })
        ));
        assert_eq!(runtime.call_count("stop"), 0);

        // The holder's own nested call re-enters.
        holder.scope(docker.stop(true)).await.unwrap();
        docker.group().release(&holder).unwrap();
    }

    #[tokio::test]
    async fn test_jobs_are_cleaned_up() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let (docker, jobs) = addon(runtime.clone());
        docker.install("local/amd64-addon-local_ssh", "9.2.1").await.unwrap();
        assert!(runtime.has_image("local/amd64-addon-local_ssh", "9.2.1"));
        assert!(jobs.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_operation_finishes_job() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let (docker, jobs) = addon(runtime);

        let pending = docker.guarded("addon_start", false, || {
            std::future::pending::<Result<(), AddonError>>()
        });
        let elapsed = tokio::time::timeout(std::time::Duration::from_millis(20), pending).await;
        assert!(elapsed.is_err());

        assert!(jobs.jobs().is_empty());
        assert!(!docker.group().is_locked());
    }

    #[tokio::test]
    async fn test_run_failure_maps_to_docker_error() {
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let (docker, _) = addon(runtime.clone());
        let spec = ContainerSpec {
            name: docker.name().to_string(),
            image: "ghcr.io/addons/ssh".into(),
            version: "1.0".into(),
            ..Default::default()
        };
        let err = docker.run(&spec).await.unwrap_err();
        assert!(matches!(err, AddonError::Docker { .. }));
        assert!(err.should_capture());
    }
}
