// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Embedded Supervisor
//!
//! Builds the full service graph in-process from a [`SupervisorConfigManifest`].
//! The daemon and every management command run against the same wiring.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use supervisor_core::{
    application::{
        addon::{AddonContext, AddonPaths},
        addon_manager::AddonManager,
        job_conditions::ConditionChecker,
        job_manager::JobManager,
        resolution::{
            checks::default_checks, evaluations::default_evaluations, fixups::default_fixups,
            ResolutionCenter, ResolutionCheck, ResolutionEvaluation, ResolutionFixup,
        },
    },
    domain::{
        core_state::{CoreState, CoreStateHandle},
        discovery::DiscoveryRegistry,
        host::HostProbe,
        runtime::ContainerRuntime,
        supervisor_config::{RuntimeBackend, SupervisorConfigManifest},
    },
    infrastructure::{
        addons_data::JsonAddonsRepository, event_bus::EventBus, host::LocalHostProbe,
        hosts_file::HostsFile, memory_runtime::InMemoryContainerRuntime, runtime::DockerRuntime,
        secrets::SecretsStore, store_loader::StoreCatalog,
    },
};

/// Loads the configuration through discovery and validates it.
pub fn load_config(config_path: Option<PathBuf>) -> Result<SupervisorConfigManifest> {
    let config = SupervisorConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

pub struct EmbeddedSupervisor {
    pub config: SupervisorConfigManifest,
    pub core_state: CoreStateHandle,
    pub event_bus: EventBus,
    pub jobs: Arc<JobManager>,
    pub resolution: Arc<ResolutionCenter>,
    pub manager: Arc<AddonManager>,
    pub evaluation: ResolutionEvaluation,
    pub checks: Arc<ResolutionCheck>,
    pub fixups: ResolutionFixup,
}

impl EmbeddedSupervisor {
    pub async fn new(config: SupervisorConfigManifest) -> Result<Self> {
        let spec = &config.spec;
        let paths = &spec.paths;

        let runtime: Arc<dyn ContainerRuntime> = match spec.addons.runtime {
            RuntimeBackend::Docker => {
                let docker = DockerRuntime::new(spec.docker.socket_path.clone())
                    .context("Failed to connect to Docker")?;
                docker
                    .healthcheck()
                    .await
                    .context("Docker engine is not reachable")?;
                Arc::new(docker)
            }
            RuntimeBackend::Memory => {
                info!("Using in-memory container runtime");
                Arc::new(InMemoryContainerRuntime::new())
            }
        };

        let core_state = CoreStateHandle::new(CoreState::Initialize);
        let event_bus = EventBus::with_default_capacity();
        let host: Arc<dyn HostProbe> = Arc::new(LocalHostProbe::new());
        let jobs = Arc::new(
            JobManager::load(paths.jobs_file())
                .with_context(|| format!("Failed to load {:?}", paths.jobs_file()))?,
        );
        let repository = Arc::new(
            JsonAddonsRepository::load(paths.addons_file())
                .with_context(|| format!("Failed to load {:?}", paths.addons_file()))?,
        );

        let secrets = Arc::new(SecretsStore::new(paths.secrets_file()));
        secrets.reload().await;

        let store = Arc::new(StoreCatalog::new(spec.addons.repositories.clone()));
        let catalog = store.refresh().await;
        info!("Store catalog holds {} add-ons", catalog);

        let resolution = Arc::new(ResolutionCenter::new(event_bus.clone()));
        let min_free_space = spec.resolution.min_free_space_bytes();
        let conditions = Arc::new(ConditionChecker::new(
            jobs.clone(),
            resolution.clone(),
            host.clone(),
            core_state.clone(),
            paths.data.clone(),
            min_free_space,
        ));

        let ctx = AddonContext {
            runtime: runtime.clone(),
            repository,
            jobs: jobs.clone(),
            event_bus: event_bus.clone(),
            secrets,
            host: host.clone(),
            paths: AddonPaths {
                data: paths.addon_data(),
                configs: paths.addon_configs(),
                backup: paths.backup(),
            },
            arch: spec.addons.arch.clone(),
            machine: spec.addons.machine.clone(),
        };
        let manager = Arc::new(AddonManager::new(
            ctx,
            store,
            resolution.clone(),
            conditions,
            Arc::new(DiscoveryRegistry::new()),
            Arc::new(HostsFile::new(paths.hosts_file())),
            Duration::from_secs(spec.addons.wait_boot),
        ));

        let evaluation = ResolutionEvaluation::new(resolution.clone(), core_state.clone()).with(
            default_evaluations(runtime, host.clone(), jobs.clone(), &spec.resolution),
        );
        let checks = Arc::new(
            ResolutionCheck::new(resolution.clone(), core_state.clone()).with(default_checks(
                manager.clone(),
                host,
                paths.data.clone(),
                min_free_space,
            )),
        );
        let fixups = ResolutionFixup::new(resolution.clone(), checks.clone())
            .with(default_fixups(manager.clone()));

        Ok(Self {
            config,
            core_state,
            event_bus,
            jobs,
            resolution,
            manager,
            evaluation,
            checks,
            fixups,
        })
    }

    /// Builds the Supervisor and brings it to `Running` without booting add-ons.
    /// Management commands operate on this view.
    pub async fn attach(config_path: Option<PathBuf>) -> Result<Self> {
        let supervisor = Self::new(load_config(config_path)?).await?;
        supervisor.core_state.set(CoreState::Setup);
        supervisor.manager.load().await;
        supervisor.core_state.set(CoreState::Running);
        Ok(supervisor)
    }
}
