// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-memory container engine.
//!
//! Used by the `memory` runtime backend and by tests. Containers and images
//! are plain records; every call is recorded and any operation can be made to
//! fail with [`InMemoryContainerRuntime::fail_on`].

use crate::domain::runtime::{
    CommandResult, ContainerMetadata, ContainerRuntime, ContainerSpec, ContainerStats, DockerInfo, RuntimeError,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContainer {
    pub image: String,
    pub version: String,
    pub running: bool,
    pub ip: IpAddr,
    pub stdin: Vec<u8>,
    pub spec: Option<ContainerSpec>,
}

pub struct InMemoryContainerRuntime {
    containers: RwLock<HashMap<String, MemoryContainer>>,
    images: RwLock<HashSet<String>>,
    foreign_images: RwLock<Vec<String>>,
    failures: RwLock<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    info: RwLock<DockerInfo>,
    next_ip: Mutex<u8>,
}

impl Default for InMemoryContainerRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryContainerRuntime {
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            images: RwLock::new(HashSet::new()),
            foreign_images: RwLock::new(Vec::new()),
            failures: RwLock::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
            info: RwLock::new(DockerInfo {
                version: "24.0.7".to_string(),
                storage_driver: "overlay2".to_string(),
                logging_driver: "journald".to_string(),
                cgroup_version: "2".to_string(),
            }),
            next_ip: Mutex::new(2),
        }
    }

    /// Seeds a container (and its image).
    pub fn with_container(&self, name: &str, image: &str, version: &str, running: bool) {
        self.add_image(image, version);
        let ip = self.allocate_ip();
        self.containers.write().insert(
            name.to_string(),
            MemoryContainer {
                image: image.to_string(),
                version: version.to_string(),
                running,
                ip,
                stdin: Vec::new(),
                spec: None,
            },
        );
    }

    pub fn add_image(&self, image: &str, version: &str) {
        self.images.write().insert(image_ref(image, version));
    }

    /// Drops a container without going through `stop`.
    pub fn remove_container(&self, name: &str) {
        self.containers.write().remove(name);
    }

    /// An unrelated container running on the same engine.
    pub fn add_foreign_image(&self, image: &str) {
        self.foreign_images.write().push(image.to_string());
    }

    pub fn set_info(&self, info: DockerInfo) {
        *self.info.write() = info;
    }

    /// Makes every later call of `operation` (e.g. "run", "stop") fail.
    pub fn fail_on(&self, operation: &str) {
        self.failures.write().insert(operation.to_string());
    }

    pub fn clear_failure(&self, operation: &str) {
        self.failures.write().remove(operation);
    }

    pub fn container(&self, name: &str) -> Option<MemoryContainer> {
        self.containers.read().get(name).cloned()
    }

    pub fn has_image(&self, image: &str, version: &str) -> bool {
        self.images.read().contains(&image_ref(image, version))
    }

    /// Recorded calls as `operation:target`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, operation: &str) -> usize {
        let prefix = format!("{}:", operation);
        self.calls.lock().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    fn record(&self, operation: &str, target: &str) -> Result<(), RuntimeError> {
        self.calls.lock().push(format!("{}:{}", operation, target));
        if self.failures.read().contains(operation) {
            return Err(RuntimeError::Api(format!("{} {} failed", operation, target)));
        }
        Ok(())
    }

    fn allocate_ip(&self) -> IpAddr {
        let mut next = self.next_ip.lock();
        let ip = IpAddr::V4(Ipv4Addr::new(172, 30, 33, *next));
        *next = next.wrapping_add(1).max(2);
        ip
    }
}

fn image_ref(image: &str, version: &str) -> String {
    format!("{}:{}", image, version)
}

#[async_trait]
impl ContainerRuntime for InMemoryContainerRuntime {
    async fn install(&self, image: &str, version: &str) -> Result<(), RuntimeError> {
        self.record("install", &image_ref(image, version))?;
        self.add_image(image, version);
        Ok(())
    }

    async fn build(&self, _context: &Path, image: &str, version: &str) -> Result<(), RuntimeError> {
        self.record("build", &image_ref(image, version))?;
        self.add_image(image, version);
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        self.record("run", &spec.name)?;
        if !self.has_image(&spec.image, &spec.version) {
            return Err(RuntimeError::NotFound(spec.image_ref()));
        }
        let ip = self.allocate_ip();
        self.containers.write().insert(
            spec.name.clone(),
            MemoryContainer {
                image: spec.image.clone(),
                version: spec.version.clone(),
                running: true,
                ip,
                stdin: Vec::new(),
                spec: Some(spec.clone()),
            },
        );
        Ok(())
    }

    async fn stop(&self, name: &str, remove_container: bool) -> Result<(), RuntimeError> {
        self.record("stop", name)?;
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(name)
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
        container.running = false;
        if remove_container {
            containers.remove(name);
        }
        Ok(())
    }

    async fn attach(&self, name: &str, image: &str, version: &str) -> Result<ContainerMetadata, RuntimeError> {
        self.record("attach", name)?;
        if let Some(container) = self.container(name) {
            return Ok(ContainerMetadata {
                name: name.to_string(),
                image: Some(container.image),
                version: Some(container.version),
                running: container.running,
            });
        }
        if self.has_image(image, version) {
            return Ok(ContainerMetadata {
                name: name.to_string(),
                image: Some(image.to_string()),
                version: Some(version.to_string()),
                running: false,
            });
        }
        Err(RuntimeError::NotFound(name.to_string()))
    }

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        self.record("is_running", name)?;
        Ok(self.container(name).is_some_and(|c| c.running))
    }

    async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        self.record("exists", name)?;
        Ok(self.containers.read().contains_key(name))
    }

    async fn image_exists(&self, image: &str, version: &str) -> Result<bool, RuntimeError> {
        self.record("image_exists", &image_ref(image, version))?;
        Ok(self.has_image(image, version))
    }

    async fn remove_image(&self, image: &str, version: &str) -> Result<(), RuntimeError> {
        self.record("remove_image", &image_ref(image, version))?;
        self.images.write().remove(&image_ref(image, version));
        Ok(())
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats, RuntimeError> {
        self.record("stats", name)?;
        match self.container(name) {
            Some(c) if c.running => Ok(ContainerStats::default()),
            _ => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn logs(&self, name: &str) -> Result<Vec<u8>, RuntimeError> {
        self.record("logs", name)?;
        self.container(name)
            .map(|_| Vec::new())
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    async fn export_image(&self, image: &str, version: &str, target: &Path) -> Result<(), RuntimeError> {
        let reference = image_ref(image, version);
        self.record("export_image", &reference)?;
        if !self.has_image(image, version) {
            return Err(RuntimeError::NotFound(reference));
        }
        tokio::fs::write(target, reference.as_bytes())
            .await
            .map_err(|e| RuntimeError::Io(e.to_string()))
    }

    async fn import_image(&self, source: &Path) -> Result<(), RuntimeError> {
        self.record("import_image", &source.display().to_string())?;
        let reference = tokio::fs::read_to_string(source)
            .await
            .map_err(|e| RuntimeError::Io(e.to_string()))?;
        self.images.write().insert(reference.trim().to_string());
        Ok(())
    }

    async fn write_stdin(&self, name: &str, data: &[u8]) -> Result<(), RuntimeError> {
        self.record("write_stdin", name)?;
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(name)
            .filter(|c| c.running)
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))?;
        container.stdin.extend_from_slice(data);
        Ok(())
    }

    async fn run_inside(&self, name: &str, command: &str) -> Result<CommandResult, RuntimeError> {
        self.record("run_inside", name)?;
        match self.container(name) {
            Some(c) if c.running => Ok(CommandResult {
                exit_code: 0,
                output: command.to_string(),
            }),
            _ => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn ip_address(&self, name: &str) -> Result<Option<IpAddr>, RuntimeError> {
        self.record("ip_address", name)?;
        self.container(name)
            .map(|c| Some(c.ip))
            .ok_or_else(|| RuntimeError::NotFound(name.to_string()))
    }

    async fn info(&self) -> Result<DockerInfo, RuntimeError> {
        self.record("info", "engine")?;
        Ok(self.info.read().clone())
    }

    async fn running_images(&self) -> Result<Vec<String>, RuntimeError> {
        self.record("running_images", "engine")?;
        let mut images: Vec<String> = self
            .containers
            .read()
            .values()
            .filter(|c| c.running)
            .map(|c| image_ref(&c.image, &c.version))
            .collect();
        images.extend(self.foreign_images.read().iter().cloned());
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_requires_image_and_records_calls() {
        let runtime = InMemoryContainerRuntime::new();
        let spec = ContainerSpec {
            name: "addon_local_ssh".to_string(),
            image: "local/amd64-addon-local_ssh".to_string(),
            version: "9.2.1".to_string(),
            ..Default::default()
        };

        assert!(matches!(runtime.run(&spec).await, Err(RuntimeError::NotFound(_))));

        runtime.add_image(&spec.image, &spec.version);
        runtime.run(&spec).await.unwrap();
        assert!(runtime.is_running("addon_local_ssh").await.unwrap());
        assert_eq!(runtime.call_count("run"), 2);
        assert_eq!(runtime.container("addon_local_ssh").unwrap().spec, Some(spec.clone()));

        runtime.stop("addon_local_ssh", true).await.unwrap();
        assert!(!runtime.exists("addon_local_ssh").await.unwrap());
    }

    #[tokio::test]
    async fn test_fail_on_injects_errors() {
        let runtime = InMemoryContainerRuntime::new();
        runtime.with_container("addon_a", "img", "1", true);
        runtime.fail_on("stop");
        assert!(runtime.stop("addon_a", false).await.is_err());
        runtime.clear_failure("stop");
        runtime.stop("addon_a", false).await.unwrap();
        assert!(!runtime.container("addon_a").unwrap().running);
    }

    #[tokio::test]
    async fn test_export_import_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = InMemoryContainerRuntime::new();
        runtime.add_image("img", "1");
        let path = dir.path().join("image.tar");
        runtime.export_image("img", "1", &path).await.unwrap();
        runtime.remove_image("img", "1").await.unwrap();
        assert!(!runtime.has_image("img", "1"));
        runtime.import_image(&path).await.unwrap();
        assert!(runtime.has_image("img", "1"));
    }
}
