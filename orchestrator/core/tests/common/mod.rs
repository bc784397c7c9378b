// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use supervisor_core::application::addon::{AddonContext, AddonPaths};
use supervisor_core::application::addon_manager::AddonManager;
use supervisor_core::application::job_conditions::ConditionChecker;
use supervisor_core::application::job_manager::JobManager;
use supervisor_core::application::resolution::ResolutionCenter;
use supervisor_core::domain::addon::{AddonConfig, AddonDescriptor};
use supervisor_core::domain::core_state::{CoreState, CoreStateHandle};
use supervisor_core::domain::discovery::DiscoveryRegistry;
use supervisor_core::infrastructure::addons_data::InMemoryAddonsRepository;
use supervisor_core::infrastructure::event_bus::EventBus;
use supervisor_core::infrastructure::host::StaticHostProbe;
use supervisor_core::infrastructure::hosts_file::HostsFile;
use supervisor_core::infrastructure::memory_runtime::InMemoryContainerRuntime;
use supervisor_core::infrastructure::secrets::SecretsStore;
use supervisor_core::infrastructure::store_loader::StoreCatalog;

/// One Supervisor wired against in-memory Docker and a temp directory.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub runtime: Arc<InMemoryContainerRuntime>,
    pub repository: Arc<InMemoryAddonsRepository>,
    pub host: Arc<StaticHostProbe>,
    pub jobs: Arc<JobManager>,
    pub event_bus: EventBus,
    pub core_state: CoreStateHandle,
    pub store: Arc<StoreCatalog>,
    pub discovery: Arc<DiscoveryRegistry>,
    pub resolution: Arc<ResolutionCenter>,
    pub manager: Arc<AddonManager>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let repository = Arc::new(InMemoryAddonsRepository::new());
        let store = Arc::new(StoreCatalog::new(vec![dir.path().join("store").join("local")]));
        Self::assemble(dir, runtime, repository, store, Arc::new(DiscoveryRegistry::new()))
    }

    /// A second Supervisor process sharing Docker, persisted data and store.
    pub fn restarted(&self) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::assemble(
            dir,
            self.runtime.clone(),
            self.repository.clone(),
            self.store.clone(),
            self.discovery.clone(),
        )
    }

    fn assemble(
        dir: tempfile::TempDir,
        runtime: Arc<InMemoryContainerRuntime>,
        repository: Arc<InMemoryAddonsRepository>,
        store: Arc<StoreCatalog>,
        discovery: Arc<DiscoveryRegistry>,
    ) -> Self {
        let host = Arc::new(StaticHostProbe::new());
        let jobs = Arc::new(JobManager::in_memory());
        let event_bus = EventBus::new(256);
        let core_state = CoreStateHandle::new(CoreState::Running);
        let resolution = Arc::new(ResolutionCenter::new(event_bus.clone()));
        let conditions = Arc::new(ConditionChecker::new(
            jobs.clone(),
            resolution.clone(),
            host.clone(),
            core_state.clone(),
            dir.path().to_path_buf(),
            1024 * 1024,
        ));
        let ctx = AddonContext {
            runtime: runtime.clone(),
            repository: repository.clone(),
            jobs: jobs.clone(),
            event_bus: event_bus.clone(),
            secrets: Arc::new(SecretsStore::new(dir.path().join("secrets.yaml"))),
            host: host.clone(),
            paths: AddonPaths {
                data: dir.path().join("addons"),
                configs: dir.path().join("addon_configs"),
                backup: dir.path().join("backup"),
            },
            arch: "amd64".to_string(),
            machine: None,
        };
        let manager = Arc::new(AddonManager::new(
            ctx,
            store.clone(),
            resolution.clone(),
            conditions,
            discovery.clone(),
            Arc::new(HostsFile::new(dir.path().join("hosts"))),
            Duration::from_millis(5),
        ));
        Self {
            dir,
            runtime,
            repository,
            host,
            jobs,
            event_bus,
            core_state,
            store,
            discovery,
            resolution,
            manager,
        }
    }

    /// Writes a manifest into the `local` repository and rescans the store.
    /// The returned config carries the store slug (`local_<slug>`).
    pub async fn publish(&self, yaml: &str) -> AddonConfig {
        let config: AddonConfig = serde_yaml::from_str(yaml).unwrap();
        let folder = self.store.repositories()[0].join(&config.slug);
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("config.yaml"), yaml).unwrap();
        self.store.refresh().await;
        self.store.get(&format!("local_{}", config.slug)).unwrap().config().as_ref().clone()
    }

    /// Drops a manifest from the `local` repository and rescans the store.
    pub async fn unpublish(&self, slug: &str) {
        let folder = self.store.repositories()[0].join(slug);
        std::fs::remove_dir_all(folder).unwrap();
        self.store.refresh().await;
    }
}

pub const SSH_MANIFEST: &str = "\
name: Terminal & SSH
slug: ssh
version: 9.2.1
image: ghcr.io/addons/{arch}-ssh
startup: services
options:
  authorized_keys: []
schema:
  authorized_keys: [str]
";
