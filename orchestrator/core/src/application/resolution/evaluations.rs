// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The built-in evaluation battery.

use super::evaluation::Evaluation;
use crate::application::job_manager::JobManager;
use crate::domain::core_state::CoreState;
use crate::domain::host::HostProbe;
use crate::domain::resolution::{ResolutionError, UnsupportedReason};
use crate::domain::runtime::ContainerRuntime;
use crate::domain::supervisor_config::ResolutionConfig;
use async_trait::async_trait;
use semver::Version;
use std::sync::Arc;

/// Every built-in rule in evaluation order.
pub fn default_evaluations(
    runtime: Arc<dyn ContainerRuntime>,
    host: Arc<dyn HostProbe>,
    jobs: Arc<JobManager>,
    config: &ResolutionConfig,
) -> Vec<Arc<dyn Evaluation>> {
    vec![
        Arc::new(AppArmorEvaluation { host: host.clone() }),
        Arc::new(CgroupVersionEvaluation {
            runtime: runtime.clone(),
        }),
        Arc::new(ContainerEvaluation {
            runtime: runtime.clone(),
            denied: config.denied_images.clone(),
        }),
        Arc::new(ContentTrustEvaluation {
            enabled: config.content_trust,
        }),
        Arc::new(DockerConfigurationEvaluation {
            runtime: runtime.clone(),
        }),
        Arc::new(DockerVersionEvaluation {
            runtime,
            minimum: config.min_docker_version.clone(),
        }),
        Arc::new(JobConditionsEvaluation { jobs }),
        Arc::new(LxcEvaluation { host: host.clone() }),
        Arc::new(OperatingSystemEvaluation {
            host: host.clone(),
            supported: config.supported_os.clone(),
        }),
        Arc::new(PrivilegedEvaluation { host }),
    ]
}

/// Parses `24.0.7`, `20.10.17+dfsg1` or `5:24.0` style engine versions.
/// Missing components count as zero.
pub fn parse_lenient_version(raw: &str) -> Option<Version> {
    let raw = raw.rsplit(':').next().unwrap_or(raw);
    let mut parts = raw
        .split(|c: char| !c.is_ascii_digit())
        .take_while(|p| !p.is_empty())
        .map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().and_then(|p| p.ok()).unwrap_or(0);
    let patch = parts.next().and_then(|p| p.ok()).unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

// ============================================================================
// Host
// ============================================================================

pub struct AppArmorEvaluation {
    host: Arc<dyn HostProbe>,
}

#[async_trait]
impl Evaluation for AppArmorEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::AppArmor
    }
    fn on_failure(&self) -> &'static str {
        "AppArmor is required to run add-ons safely"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Initialize]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        Ok(!self.host.apparmor_enabled().await)
    }
}

pub struct LxcEvaluation {
    host: Arc<dyn HostProbe>,
}

#[async_trait]
impl Evaluation for LxcEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::Lxc
    }
    fn on_failure(&self) -> &'static str {
        "Detected a LXC container, which is not supported"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Initialize]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        Ok(self.host.virtualization().await.as_deref() == Some("lxc"))
    }
}

pub struct OperatingSystemEvaluation {
    host: Arc<dyn HostProbe>,
    supported: Vec<String>,
}

#[async_trait]
impl Evaluation for OperatingSystemEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::OperatingSystem
    }
    fn on_failure(&self) -> &'static str {
        "Detected an unsupported operating system"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Setup]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        let Some(os) = self.host.operating_system().await else {
            return Ok(true);
        };
        Ok(!self.supported.iter().any(|prefix| os.starts_with(prefix.as_str())))
    }
}

pub struct PrivilegedEvaluation {
    host: Arc<dyn HostProbe>,
}

#[async_trait]
impl Evaluation for PrivilegedEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::Privileged
    }
    fn on_failure(&self) -> &'static str {
        "Supervisor does not run in privileged mode"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Initialize]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        Ok(!self.host.is_privileged().await)
    }
}

// ============================================================================
// Docker
// ============================================================================

pub struct CgroupVersionEvaluation {
    runtime: Arc<dyn ContainerRuntime>,
}

#[async_trait]
impl Evaluation for CgroupVersionEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::CgroupVersion
    }
    fn on_failure(&self) -> &'static str {
        "Docker uses an unsupported cgroup version"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Setup]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        let info = self.runtime.info().await?;
        Ok(!matches!(info.cgroup_version.as_str(), "1" | "2"))
    }
}

pub struct ContainerEvaluation {
    runtime: Arc<dyn ContainerRuntime>,
    denied: Vec<String>,
}

#[async_trait]
impl Evaluation for ContainerEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::Container
    }
    fn on_failure(&self) -> &'static str {
        "Found containers known to interfere with the Supervisor"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Startup, CoreState::Running]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        let running = self.runtime.running_images().await?;
        Ok(running
            .iter()
            .any(|image| self.denied.iter().any(|denied| image.contains(denied.as_str()))))
    }
}

pub struct ContentTrustEvaluation {
    enabled: bool,
}

#[async_trait]
impl Evaluation for ContentTrustEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::ContentTrust
    }
    fn on_failure(&self) -> &'static str {
        "Content trust is disabled"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Initialize, CoreState::Setup, CoreState::Running]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        Ok(!self.enabled)
    }
}

pub struct DockerConfigurationEvaluation {
    runtime: Arc<dyn ContainerRuntime>,
}

#[async_trait]
impl Evaluation for DockerConfigurationEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::DockerConfiguration
    }
    fn on_failure(&self) -> &'static str {
        "Docker uses an unsupported storage or logging driver"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Initialize]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        let info = self.runtime.info().await?;
        Ok(info.storage_driver != "overlay2" || info.logging_driver != "journald")
    }
}

pub struct DockerVersionEvaluation {
    runtime: Arc<dyn ContainerRuntime>,
    minimum: String,
}

#[async_trait]
impl Evaluation for DockerVersionEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::DockerVersion
    }
    fn on_failure(&self) -> &'static str {
        "Docker version is older than the supported minimum"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Initialize]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        let minimum = parse_lenient_version(&self.minimum).ok_or_else(|| {
            ResolutionError::Probe(format!("invalid minimum Docker version '{}'", self.minimum))
        })?;
        let info = self.runtime.info().await?;
        let current = parse_lenient_version(&info.version).ok_or_else(|| {
            ResolutionError::Probe(format!("unreadable Docker version '{}'", info.version))
        })?;
        Ok(current < minimum)
    }
}

// ============================================================================
// Supervisor
// ============================================================================

pub struct JobConditionsEvaluation {
    jobs: Arc<JobManager>,
}

#[async_trait]
impl Evaluation for JobConditionsEvaluation {
    fn reason(&self) -> UnsupportedReason {
        UnsupportedReason::JobConditions
    }
    fn on_failure(&self) -> &'static str {
        "Job conditions are being ignored"
    }
    fn states(&self) -> &'static [CoreState] {
        &[CoreState::Initialize, CoreState::Setup, CoreState::Running]
    }
    async fn evaluate(&self) -> Result<bool, ResolutionError> {
        Ok(!self.jobs.ignore_conditions().is_empty())
    }
}
