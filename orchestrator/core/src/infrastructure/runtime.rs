// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::runtime::{
    CommandResult, ContainerMetadata, ContainerRuntime, ContainerSpec, ContainerStats, DockerInfo, RuntimeError,
};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, ListContainersOptions,
    LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions, StatsOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CreateImageOptions, ImportImageOptions, RemoveImageOptions};
use bollard::models::{DeviceMapping, HostConfig, PortBinding};
use bollard::Docker;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Seconds Docker waits for a container to exit before killing it.
const STOP_TIMEOUT: i64 = 10;
const LOG_TAIL: &str = "500";

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(socket_path: Option<String>) -> Result<Self, RuntimeError> {
        // Connect to Docker daemon (custom socket or auto-detect)
        let docker = if let Some(path) = socket_path {
            Docker::connect_with_unix(&path, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
                RuntimeError::Request(format!(
                    "Failed to connect to Docker at {}: {}\n\n\
                     Ensure Docker is running and the socket path is correct.",
                    path, e
                ))
            })?
        } else {
            Docker::connect_with_local_defaults().map_err(|e| {
                RuntimeError::Request(format!(
                    "Failed to connect to Docker: {}\n\n\
                     Common causes:\n\
                     - Docker daemon not running (check: docker ps)\n\
                     - Permission denied accessing Docker socket\n\n\
                     Try:\n\
                     - Start Docker: systemctl start docker\n\
                     - Check permissions: ls -la /var/run/docker.sock",
                    e
                ))
            })?
        };

        Ok(Self { docker })
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Request(format!(
                "Cannot connect to Docker daemon: {}\n\n\
                 Docker healthcheck failed. Verify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }

    async fn inspect_json(&self, name: &str) -> Result<Value, RuntimeError> {
        let inspect = self.docker.inspect_container(name, None::<bollard::query_parameters::InspectContainerOptions>).await.map_err(map_error)?;
        serde_json::to_value(inspect).map_err(|e| RuntimeError::Api(e.to_string()))
    }

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
            .ports
            .iter()
            .map(|(container, host)| {
                (
                    container.clone(),
                    Some(vec![PortBinding {
                        host_ip: None,
                        host_port: Some(host.to_string()),
                    }]),
                )
            })
            .collect();

        let devices: Vec<DeviceMapping> = spec
            .devices
            .iter()
            .map(|path| DeviceMapping {
                path_on_host: Some(path.clone()),
                path_in_container: Some(path.clone()),
                cgroup_permissions: Some("rwm".to_string()),
            })
            .collect();

        let security_opt = spec
            .apparmor_profile
            .as_ref()
            .map(|profile| vec![format!("apparmor={}", profile)]);

        HostConfig {
            binds: (!spec.binds.is_empty()).then(|| spec.binds.clone()),
            network_mode: spec.host_network.then(|| "host".to_string()),
            port_bindings: (!spec.host_network && !port_bindings.is_empty()).then_some(port_bindings),
            cap_add: (!spec.privileged.is_empty()).then(|| spec.privileged.clone()),
            devices: (!devices.is_empty()).then_some(devices),
            init: Some(spec.init),
            security_opt,
            ..Default::default()
        }
    }
}

/// Maps engine errors onto the domain taxonomy; 404 answers become `NotFound`.
fn map_error(err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError { status_code: 404, message } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError { status_code, message } => {
            RuntimeError::Api(format!("{} ({})", message, status_code))
        }
        BollardError::IOError { err } => RuntimeError::Io(err.to_string()),
        other => RuntimeError::Request(other.to_string()),
    }
}

fn split_image(reference: &str) -> (String, Option<String>) {
    match reference.rsplit_once(':') {
        Some((image, tag)) if !tag.contains('/') => (image.to_string(), Some(tag.to_string())),
        _ => (reference.to_string(), None),
    }
}

/// Packs a build context directory into an in-memory tar archive.
fn tar_context(context: &Path) -> Result<Vec<u8>, RuntimeError> {
    let mut builder = tar::Builder::new(Vec::new());
    builder
        .append_dir_all(".", context)
        .map_err(|e| RuntimeError::Io(format!("Failed to pack build context {:?}: {}", context, e)))?;
    builder
        .into_inner()
        .map_err(|e| RuntimeError::Io(format!("Failed to pack build context {:?}: {}", context, e)))
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn install(&self, image: &str, version: &str) -> Result<(), RuntimeError> {
        info!("Pulling image: {}:{}", image, version);
        let options = Some(CreateImageOptions {
            from_image: image.to_string(),
            tag: version.to_string(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            if let Err(e) = result {
                return Err(RuntimeError::Request(format!(
                    "Failed to pull image {}:{}: {}\n\n\
                     Try manually: docker pull {}:{}",
                    image, version, e, image, version
                )));
            }
        }
        info!("Successfully pulled image: {}:{}", image, version);
        Ok(())
    }

    async fn build(&self, context: &Path, image: &str, version: &str) -> Result<(), RuntimeError> {
        let tag = format!("{}:{}", image, version);
        info!("Building image {} from {:?}", tag, context);

        let context = context.to_path_buf();
        let archive = tokio::task::spawn_blocking(move || tar_context(&context))
            .await
            .map_err(|e| RuntimeError::Io(e.to_string()))??;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_string(),
            t: tag.clone(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self
            .docker
            .build_image(options, None, Some(bollard::body_full(archive.into())));
        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(RuntimeError::Api(format!("Build of {} failed: {}", tag, error)));
                    }
                }
                Err(e) => return Err(map_error(e)),
            }
        }
        info!("Successfully built image: {}", tag);
        Ok(())
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        // Replace a stale container left behind by a previous run
        if self.exists(&spec.name).await? {
            debug!("Removing stale container {}", spec.name);
            self.stop(&spec.name, true).await?;
        }

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let container_config = Config {
            image: Some(spec.image_ref()),
            hostname: Some(spec.hostname.clone()),
            env: Some(env),
            open_stdin: Some(spec.stdin),
            attach_stdin: Some(spec.stdin),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };

        let res = self
            .docker
            .create_container(Some(options), container_config)
            .await
            .map_err(map_error)?;

        self.docker
            .start_container(&res.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)?;

        info!("Started container {} with {}", spec.name, spec.image_ref());
        Ok(())
    }

    async fn stop(&self, name: &str, remove_container: bool) -> Result<(), RuntimeError> {
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: STOP_TIMEOUT }))
            .await
        {
            Ok(()) => {}
            // 304: already stopped
            Err(BollardError::DockerResponseServerError { status_code: 304, .. }) => {}
            Err(e) => return Err(map_error(e)),
        }

        if remove_container {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            self.docker
                .remove_container(name, Some(options))
                .await
                .map_err(map_error)?;
        }

        info!("Stopped container {}", name);
        Ok(())
    }

    async fn attach(&self, name: &str, image: &str, version: &str) -> Result<ContainerMetadata, RuntimeError> {
        match self.inspect_json(name).await {
            Ok(inspect) => {
                let (image, version) = inspect
                    .pointer("/Config/Image")
                    .and_then(Value::as_str)
                    .map(split_image)
                    .unwrap_or((image.to_string(), Some(version.to_string())));
                let running = inspect
                    .pointer("/State/Running")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(ContainerMetadata {
                    name: name.to_string(),
                    image: Some(image),
                    version,
                    running,
                })
            }
            Err(RuntimeError::NotFound(_)) => {
                let reference = format!("{}:{}", image, version);
                self.docker.inspect_image(&reference).await.map_err(map_error)?;
                debug!("No container {}, attached to image {}", name, reference);
                Ok(ContainerMetadata {
                    name: name.to_string(),
                    image: Some(image.to_string()),
                    version: Some(version.to_string()),
                    running: false,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn is_running(&self, name: &str) -> Result<bool, RuntimeError> {
        match self.inspect_json(name).await {
            Ok(inspect) => Ok(inspect
                .pointer("/State/Running")
                .and_then(Value::as_bool)
                .unwrap_or(false)),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        match self.inspect_json(name).await {
            Ok(_) => Ok(true),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn image_exists(&self, image: &str, version: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(&format!("{}:{}", image, version)).await {
            Ok(_) => Ok(true),
            Err(e) => match map_error(e) {
                RuntimeError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn remove_image(&self, image: &str, version: &str) -> Result<(), RuntimeError> {
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        self.docker
            .remove_image(&format!("{}:{}", image, version), Some(options), None)
            .await
            .map_err(map_error)?;
        info!("Removed image {}:{}", image, version);
        Ok(())
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats, RuntimeError> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = self.docker.stats(name, Some(options));
        let sample = match stream.next().await {
            Some(Ok(sample)) => serde_json::to_value(sample).map_err(|e| RuntimeError::Api(e.to_string()))?,
            Some(Err(e)) => return Err(map_error(e)),
            None => return Err(RuntimeError::NotFound(name.to_string())),
        };

        let number = |pointer: &str| sample.pointer(pointer).and_then(Value::as_u64).unwrap_or(0);

        let cpu_delta = number("/cpu_stats/cpu_usage/total_usage") as f64
            - number("/precpu_stats/cpu_usage/total_usage") as f64;
        let system_delta =
            number("/cpu_stats/system_cpu_usage") as f64 - number("/precpu_stats/system_cpu_usage") as f64;
        let online_cpus = number("/cpu_stats/online_cpus").max(1) as f64;
        let cpu_percent = if cpu_delta > 0.0 && system_delta > 0.0 {
            (cpu_delta / system_delta) * online_cpus * 100.0
        } else {
            0.0
        };

        let (mut network_rx, mut network_tx) = (0, 0);
        if let Some(networks) = sample.get("networks").and_then(Value::as_object) {
            for network in networks.values() {
                network_rx += network.get("rx_bytes").and_then(Value::as_u64).unwrap_or(0);
                network_tx += network.get("tx_bytes").and_then(Value::as_u64).unwrap_or(0);
            }
        }

        let (mut blk_read, mut blk_write) = (0, 0);
        if let Some(entries) = sample
            .pointer("/blkio_stats/io_service_bytes_recursive")
            .and_then(Value::as_array)
        {
            for entry in entries {
                let value = entry.get("value").and_then(Value::as_u64).unwrap_or(0);
                match entry.get("op").and_then(Value::as_str).map(str::to_lowercase).as_deref() {
                    Some("read") => blk_read += value,
                    Some("write") => blk_write += value,
                    _ => {}
                }
            }
        }

        Ok(ContainerStats {
            cpu_percent: (cpu_percent * 100.0).round() / 100.0,
            memory_usage: number("/memory_stats/usage"),
            memory_limit: number("/memory_stats/limit"),
            network_rx,
            network_tx,
            blk_read,
            blk_write,
        })
    }

    async fn logs(&self, name: &str) -> Result<Vec<u8>, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: LOG_TAIL.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.logs(name, Some(options));
        let mut logs = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_error)?;
            logs.extend_from_slice(&chunk.into_bytes());
        }
        Ok(logs)
    }

    async fn export_image(&self, image: &str, version: &str, target: &Path) -> Result<(), RuntimeError> {
        let reference = format!("{}:{}", image, version);
        let mut file = tokio::fs::File::create(target)
            .await
            .map_err(|e| RuntimeError::Io(format!("Failed to create {:?}: {}", target, e)))?;

        let mut stream = self.docker.export_image(&reference);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_error)?;
            file.write_all(&chunk)
                .await
                .map_err(|e| RuntimeError::Io(e.to_string()))?;
        }
        file.flush().await.map_err(|e| RuntimeError::Io(e.to_string()))?;
        info!("Exported image {} to {:?}", reference, target);
        Ok(())
    }

    async fn import_image(&self, source: &Path) -> Result<(), RuntimeError> {
        let archive = tokio::fs::read(source)
            .await
            .map_err(|e| RuntimeError::Io(format!("Failed to read {:?}: {}", source, e)))?;

        let mut stream = self.docker.import_image(
            ImportImageOptions { quiet: true },
            bollard::body_full(archive.into()),
            None,
        );
        while let Some(result) = stream.next().await {
            let output = result.map_err(map_error)?;
            if let Some(error) = output.error {
                return Err(RuntimeError::Api(format!("Import of {:?} failed: {}", source, error)));
            }
        }
        info!("Imported image from {:?}", source);
        Ok(())
    }

    async fn write_stdin(&self, name: &str, data: &[u8]) -> Result<(), RuntimeError> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stream: Some(true),
            ..Default::default()
        };
        let AttachContainerResults { mut input, .. } = self
            .docker
            .attach_container(name, Some(options))
            .await
            .map_err(map_error)?;

        input.write_all(data).await.map_err(|e| RuntimeError::Io(e.to_string()))?;
        input.flush().await.map_err(|e| RuntimeError::Io(e.to_string()))?;
        Ok(())
    }

    async fn run_inside(&self, name: &str, command: &str) -> Result<CommandResult, RuntimeError> {
        let exec_config = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            ..Default::default()
        };

        let exec = self.docker.create_exec(name, exec_config).await.map_err(map_error)?;

        let start_opts = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let res = self
            .docker
            .start_exec(&exec.id, Some(start_opts))
            .await
            .map_err(map_error)?;

        let mut output = String::new();
        if let StartExecResults::Attached { output: mut stream, .. } = res {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                        output.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Exec output stream for {} failed: {}", name, e);
                        break;
                    }
                }
            }
        }

        let exec_inspect = self.docker.inspect_exec(&exec.id).await.map_err(map_error)?;

        Ok(CommandResult {
            exit_code: exec_inspect.exit_code.unwrap_or(0),
            output,
        })
    }

    async fn ip_address(&self, name: &str) -> Result<Option<IpAddr>, RuntimeError> {
        let inspect = self.inspect_json(name).await?;
        let networks = inspect
            .pointer("/NetworkSettings/Networks")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(networks
            .values()
            .filter_map(|network| network.get("IPAddress").and_then(Value::as_str))
            .find_map(|ip| ip.parse::<IpAddr>().ok()))
    }

    async fn info(&self) -> Result<DockerInfo, RuntimeError> {
        let info = self.docker.info().await.map_err(map_error)?;
        let info = serde_json::to_value(info).map_err(|e| RuntimeError::Api(e.to_string()))?;
        let field = |name: &str| info.get(name).and_then(Value::as_str).unwrap_or_default().to_string();

        Ok(DockerInfo {
            version: field("ServerVersion"),
            storage_driver: field("Driver"),
            logging_driver: field("LoggingDriver"),
            cgroup_version: field("CgroupVersion"),
        })
    }

    async fn running_images(&self) -> Result<Vec<String>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };
        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;
        Ok(containers.into_iter().filter_map(|c| c.image).collect())
    }
}
