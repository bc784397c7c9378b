// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Everything needed to create and start one add-on container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub version: String,
    pub hostname: String,
    pub env: HashMap<String, String>,
    pub host_network: bool,
    pub privileged: Vec<String>,
    pub devices: Vec<String>,
    pub binds: Vec<String>,
    /// Container port ("8080/tcp") to host port.
    pub ports: HashMap<String, u16>,
    pub stdin: bool,
    pub init: bool,
    pub apparmor_profile: Option<String>,
}

impl ContainerSpec {
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }
}

/// What `attach` found on the engine for a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    pub name: String,
    pub image: Option<String>,
    pub version: Option<String>,
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    pub cpu_percent: f64,
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub network_rx: u64,
    pub network_tx: u64,
    pub blk_read: u64,
    pub blk_write: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i64,
    pub output: String,
}

/// Engine facts consumed by the resolution evaluations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerInfo {
    pub version: String,
    pub storage_driver: String,
    pub logging_driver: String,
    pub cgroup_version: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The engine could not be reached or the request failed in transit.
    #[error("Docker request failed: {0}")]
    Request(String),
    /// The engine answered with an error.
    #[error("Docker API error: {0}")]
    Api(String),
    #[error("Container or image not found: {0}")]
    NotFound(String),
    #[error("Docker I/O error: {0}")]
    Io(String),
}

/// Port onto the container engine. All calls are asynchronous and fail with a
/// [`RuntimeError`]; the add-on layer treats the engine as a black box.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pulls `image:version`.
    async fn install(&self, image: &str, version: &str) -> Result<(), RuntimeError>;

    /// Builds `image:version` from a local build context.
    async fn build(&self, context: &Path, image: &str, version: &str) -> Result<(), RuntimeError>;

    /// Creates and starts a container, replacing any stale one with the same name.
    async fn run(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    /// Stops a container and optionally removes it.
    async fn stop(&self, name: &str, remove_container: bool) -> Result<(), RuntimeError>;

    /// Inspects an existing container (or, failing that, the image).
    async fn attach(&self, name: &str, image: &str, version: &str) -> Result<ContainerMetadata, RuntimeError>;

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError>;

    async fn exists(&self, name: &str) -> Result<bool, RuntimeError>;

    async fn image_exists(&self, image: &str, version: &str) -> Result<bool, RuntimeError>;

    async fn remove_image(&self, image: &str, version: &str) -> Result<(), RuntimeError>;

    async fn stats(&self, name: &str) -> Result<ContainerStats, RuntimeError>;

    async fn logs(&self, name: &str) -> Result<Vec<u8>, RuntimeError>;

    async fn export_image(&self, image: &str, version: &str, target: &Path) -> Result<(), RuntimeError>;

    async fn import_image(&self, source: &Path) -> Result<(), RuntimeError>;

    async fn write_stdin(&self, name: &str, data: &[u8]) -> Result<(), RuntimeError>;

    async fn run_inside(&self, name: &str, command: &str) -> Result<CommandResult, RuntimeError>;

    async fn ip_address(&self, name: &str) -> Result<Option<IpAddr>, RuntimeError>;

    async fn info(&self) -> Result<DockerInfo, RuntimeError>;

    /// Image references of all running containers.
    async fn running_images(&self) -> Result<Vec<String>, RuntimeError>;
}

/// Local build context of an add-on without a published image.
pub fn build_context(location: &Path) -> Option<PathBuf> {
    ["Dockerfile", "build.yaml", "build.json"]
        .iter()
        .any(|file| location.join(file).exists())
        .then(|| location.to_path_buf())
}
