// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Installed Add-on
//!
//! Runtime object of one installed add-on. It keeps working copies of the
//! add-on's two records (`system` manifest and `user` settings) and commits
//! every change back through the [`AddonsRepository`].
//!
//! # State
//!
//! `Unknown` until [`Addon::load`] attaches to Docker, then `Started` or
//! `Stopped`; `Error` when a Docker action fails. Every state change is
//! published as [`AddonEvent::StateChanged`]; setting the current state again
//! publishes nothing.
//!
//! # Locking
//!
//! Every lifecycle operation runs as a job holding the add-on's job group.
//! Compositions such as `restart` re-enter the group from their nested
//! `stop`/`start` jobs.

use crate::application::addon_backup::{self, BackupMetadata};
use crate::application::docker_addon::DockerAddon;
use crate::application::job_manager::JobManager;
use crate::domain::addon::options::{OptionsValidator, ValidatedOptions};
use crate::domain::addon::{
    AddonBoot, AddonConfig, AddonDescriptor, AddonError, AddonPersist, AddonState, BackupMode,
};
use crate::domain::events::AddonEvent;
use crate::domain::host::HostProbe;
use crate::domain::repository::{AddonsRepository, InstalledRecord};
use crate::domain::runtime::{
    build_context, CommandResult, ContainerRuntime, ContainerSpec, ContainerStats, RuntimeError,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::secrets::SecretsStore;
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Resolves once a start settles. Fails only if the add-on ended in `Error`.
pub type StartupWait = BoxFuture<'static, Result<(), AddonError>>;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(120);

/// Filesystem roots for add-on state.
#[derive(Debug, Clone)]
pub struct AddonPaths {
    /// `<data>/<slug>` is mounted as `/data`
    pub data: PathBuf,
    /// `<configs>/<slug>` is mounted as `/config` for add-ons mapping `addon_config`
    pub configs: PathBuf,
    pub backup: PathBuf,
}

/// Collaborators shared by every installed add-on.
#[derive(Clone)]
pub struct AddonContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub repository: Arc<dyn AddonsRepository>,
    pub jobs: Arc<JobManager>,
    pub event_bus: EventBus,
    pub secrets: Arc<SecretsStore>,
    pub host: Arc<dyn HostProbe>,
    pub paths: AddonPaths,
    pub arch: String,
    pub machine: Option<String>,
}

pub struct Addon {
    slug: String,
    ctx: AddonContext,
    instance: DockerAddon,
    system: RwLock<Arc<AddonConfig>>,
    persist: RwLock<AddonPersist>,
    state: watch::Sender<AddonState>,
}

impl Addon {
    /// Add-on restored from its stored records.
    pub fn new(record: InstalledRecord, ctx: AddonContext) -> Self {
        let slug = record.system.slug.clone();
        let (state, _) = watch::channel(AddonState::Unknown);
        Self {
            instance: DockerAddon::new(&slug, ctx.runtime.clone(), ctx.jobs.clone()),
            slug,
            system: RwLock::new(Arc::new(record.system)),
            persist: RwLock::new(record.user),
            state,
            ctx,
        }
    }

    /// Add-on about to be installed from a store manifest.
    pub fn from_store(config: AddonConfig, ctx: AddonContext) -> Self {
        let user = AddonPersist::for_install(&config, &ctx.arch);
        Self::new(InstalledRecord { system: config, user }, ctx)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn instance(&self) -> &DockerAddon {
        &self.instance
    }

    pub fn state(&self) -> AddonState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AddonState> {
        self.state.subscribe()
    }

    /// Sets the state. Returns false, and publishes nothing, when the state
    /// is unchanged.
    pub fn set_state(&self, state: AddonState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!("Add-on {} is now {}", self.slug, state);
            self.ctx.event_bus.publish_addon_event(AddonEvent::StateChanged {
                slug: self.slug.clone(),
                state,
                changed_at: Utc::now(),
            });
        }
        changed
    }

    pub fn persist(&self) -> AddonPersist {
        self.persist.read().clone()
    }

    pub fn boot(&self) -> AddonBoot {
        self.persist.read().boot
    }

    pub fn image(&self) -> String {
        self.persist.read().image.clone()
    }

    pub fn path_data(&self) -> PathBuf {
        self.ctx.paths.data.join(&self.slug)
    }

    pub fn path_config(&self) -> PathBuf {
        self.ctx.paths.configs.join(&self.slug)
    }

    /// Manifest defaults overlaid with the user's options.
    pub fn options(&self) -> Value {
        let mut merged = match &self.config().options {
            Value::Object(defaults) => defaults.clone(),
            _ => serde_json::Map::new(),
        };
        if let Value::Object(user) = &self.persist.read().options {
            for (key, value) in user {
                merged.insert(key.clone(), value.clone());
            }
        }
        Value::Object(merged)
    }

    pub fn record(&self) -> InstalledRecord {
        InstalledRecord {
            system: (*self.config()).clone(),
            user: self.persist(),
        }
    }

    pub fn set_options(&self, options: Value) -> Result<(), AddonError> {
        let mut persist = self.persist();
        persist.options = options;
        self.commit_persist(persist)
    }

    pub fn set_boot(&self, boot: AddonBoot) -> Result<(), AddonError> {
        let mut persist = self.persist();
        persist.boot = boot;
        self.commit_persist(persist)
    }

    fn commit_persist(&self, persist: AddonPersist) -> Result<(), AddonError> {
        self.ctx.repository.update_user(&self.slug, persist.clone())?;
        *self.persist.write() = persist;
        Ok(())
    }

    fn commit_record(&self, record: InstalledRecord) -> Result<(), AddonError> {
        self.ctx.repository.upsert(&self.slug, record.clone())?;
        *self.system.write() = Arc::new(record.system);
        *self.persist.write() = record.user;
        Ok(())
    }

    pub fn check_available(&self, config: &AddonConfig) -> Result<(), AddonError> {
        if !config.supports_arch(&self.ctx.arch) {
            return Err(AddonError::NotSupported(format!(
                "Add-on {} is not available for architecture {}",
                self.slug, self.ctx.arch
            )));
        }
        if !config.supports_machine(self.ctx.machine.as_deref()) {
            return Err(AddonError::NotSupported(format!(
                "Add-on {} is not available for this machine",
                self.slug
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Docker state
    // ========================================================================

    /// Whether Docker reports the container running. Docker errors count as
    /// not running.
    pub async fn is_running(&self) -> bool {
        match self.instance.is_running().await {
            Ok(running) => running,
            Err(e) => {
                debug!("Can't read state of {}: {}", self.instance.name(), e);
                false
            }
        }
    }

    /// Whether the add-on's image is present in Docker. An unreachable
    /// daemon is an error, never a missing image.
    pub async fn exists(&self) -> Result<bool, RuntimeError> {
        let persist = self.persist();
        self.instance.exists(&persist.image, &persist.version).await
    }

    /// Attaches to an existing container. Docker failures leave the state
    /// `Unknown`.
    pub async fn load(&self) {
        let persist = self.persist();
        match self.instance.attach(&persist.image, &persist.version).await {
            Ok(meta) => {
                let state = if meta.running {
                    AddonState::Started
                } else {
                    AddonState::Stopped
                };
                self.set_state(state);
            }
            Err(e) => {
                warn!("Can't attach to add-on {}: {}", self.slug, e);
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Starts the container. Returns a future that resolves once the start
    /// has settled; the caller decides whether to await it.
    pub async fn start(&self) -> Result<StartupWait, AddonError> {
        self.instance
            .guarded("addon_start", false, move || async move {
                if self.is_running().await {
                    warn!("Add-on {} is already running", self.slug);
                    return Ok(self.wait_for_startup());
                }

                self.ensure_access_token()?;
                let validated = self.write_options().await?;
                if self.config().audio {
                    self.write_audio().await?;
                }

                let spec = self.container_spec(&validated).await;
                if let Err(e) = self.instance.run(&spec).await {
                    self.set_state(AddonState::Error);
                    return Err(e);
                }

                info!("Add-on {} started", self.slug);
                self.set_state(AddonState::Started);
                Ok(self.wait_for_startup())
            })
            .await
    }

    pub async fn stop(&self) -> Result<(), AddonError> {
        self.instance
            .guarded("addon_stop", false, move || async move {
                if let Err(e) = self.instance.stop(true).await {
                    self.set_state(AddonState::Error);
                    return Err(e);
                }
                self.set_state(AddonState::Stopped);
                Ok(())
            })
            .await
    }

    /// Stops then starts. A failing stop is ignored so a never-started add-on
    /// restarts like a start.
    pub async fn restart(&self) -> Result<StartupWait, AddonError> {
        self.instance
            .guarded("addon_restart", false, move || async move {
                if let Err(e) = self.stop().await {
                    debug!("Ignoring stop failure during restart of {}: {}", self.slug, e);
                }
                self.start().await
            })
            .await
    }

    fn wait_for_startup(&self) -> StartupWait {
        let mut state = self.state.subscribe();
        let slug = self.slug.clone();
        Box::pin(async move {
            let settled = tokio::time::timeout(
                STARTUP_TIMEOUT,
                state.wait_for(|s| *s != AddonState::Startup),
            )
            .await
            .map(|result| result.map(|s| *s));

            match settled {
                Ok(Ok(AddonState::Error)) => Err(AddonError::Invalid(format!("Add-on {} failed to start", slug))),
                Ok(_) => Ok(()),
                Err(_) => {
                    warn!("Timeout while waiting for add-on {} to start", slug);
                    Ok(())
                }
            }
        })
    }

    fn ensure_access_token(&self) -> Result<(), AddonError> {
        if self.persist.read().access_token.is_some() {
            return Ok(());
        }
        let mut persist = self.persist();
        persist.access_token = Some(generate_token());
        self.commit_persist(persist)
    }

    /// Validates the options against the schema and writes `options.json`
    /// into the data directory.
    pub async fn write_options(&self) -> Result<ValidatedOptions, AddonError> {
        self.ctx.secrets.reload().await;
        let devices = self.ctx.host.devices().await;
        let config = self.config();
        let options = self.options();

        let validated = OptionsValidator::new(&config.schema, &devices, self.ctx.secrets.as_ref())
            .validate(&options)
            .map_err(|e| {
                error!("Add-on {} has invalid options: {}", self.slug, e);
                AddonError::Configuration {
                    slug: self.slug.clone(),
                    message: e.to_string(),
                }
            })?;

        let path = self.path_data().join("options.json");
        let write = async {
            tokio::fs::create_dir_all(self.path_data()).await?;
            let json = serde_json::to_vec_pretty(&validated.options)?;
            tokio::fs::write(&path, json).await
        };
        write.await.map_err(|e: std::io::Error| {
            error!("Can't write {:?}: {}", path, e);
            AddonError::Configuration {
                slug: self.slug.clone(),
                message: format!("can't write options: {}", e),
            }
        })?;

        debug!("Wrote options of {} to {:?}", self.slug, path);
        Ok(validated)
    }

    async fn write_audio(&self) -> Result<(), AddonError> {
        let persist = self.persist();
        let input = persist.audio_input.as_deref().unwrap_or("default");
        let output = persist.audio_output.as_deref().unwrap_or("default");
        let asound = format!(
            "pcm.!default {{\n    type asym\n    capture.pcm \"mic\"\n    playback.pcm \"speaker\"\n}}\n\
             pcm.mic {{\n    type plug\n    slave {{\n        pcm \"{}\"\n    }}\n}}\n\
             pcm.speaker {{\n    type plug\n    slave {{\n        pcm \"{}\"\n    }}\n}}\n",
            input, output
        );

        let path = self.path_data().join("asound");
        tokio::fs::write(&path, asound)
            .await
            .map_err(|e| AddonError::Configuration {
                slug: self.slug.clone(),
                message: format!("can't write audio config: {}", e),
            })
    }

    async fn container_spec(&self, validated: &ValidatedOptions) -> ContainerSpec {
        let config = self.config();
        let persist = self.persist();

        let mut env = config.environment.clone();
        if let Some(token) = &persist.access_token {
            env.insert("SUPERVISOR_TOKEN".to_string(), token.clone());
        }

        let mut devices = config.devices.clone();
        devices.extend(validated.devices.iter().map(|d| d.path.display().to_string()));
        devices.dedup();

        let mut binds = vec![format!("{}:/data:rw", self.path_data().display())];
        if config.map.iter().any(|m| m.starts_with("addon_config")) {
            binds.push(format!("{}:/config:rw", self.path_config().display()));
        }

        let ports = config
            .ports
            .iter()
            .filter_map(|(container, host)| host.map(|h| (container.clone(), h)))
            .collect();

        let mut apparmor_profile = None;
        if config.apparmor && self.ctx.host.apparmor_enabled().await {
            if config.location.join("apparmor.txt").is_file() {
                apparmor_profile = Some(self.slug.clone());
            } else {
                debug!("No AppArmor profile for {}, using the Docker default", self.slug);
            }
        }

        ContainerSpec {
            name: self.instance.name().to_string(),
            image: persist.image,
            version: persist.version,
            hostname: self.slug.replace('_', "-"),
            env,
            host_network: config.host_network,
            privileged: config.privileged.clone(),
            devices,
            binds,
            ports,
            stdin: config.stdin,
            init: config.init,
            apparmor_profile,
        }
    }

    async fn install_image(&self, config: &AddonConfig, image: &str, version: &str) -> Result<(), AddonError> {
        if config.is_local_build() {
            let context = build_context(&config.location).ok_or_else(|| {
                AddonError::Invalid(format!(
                    "Add-on {} has no build context in {}",
                    self.slug,
                    config.location.display()
                ))
            })?;
            self.instance.build(&context, image, version).await
        } else {
            self.instance.install(image, version).await
        }
    }

    // ========================================================================
    // Install / uninstall / update
    // ========================================================================

    pub async fn install(&self) -> Result<(), AddonError> {
        self.instance
            .guarded("addon_install", false, move || async move {
                let record = self.record();
                self.ctx.repository.upsert(&self.slug, record.clone())?;

                let installed = async {
                    tokio::fs::create_dir_all(self.path_data())
                        .await
                        .map_err(|e| AddonError::io(&self.slug, e))?;
                    self.install_image(&record.system, &record.user.image, &record.user.version)
                        .await
                }
                .await;

                if let Err(e) = installed {
                    error!("Installation of {} failed: {}", self.slug, e);
                    if let Err(rollback) = self.ctx.repository.remove(&self.slug) {
                        warn!("Can't roll back {}: {}", self.slug, rollback);
                    }
                    return Err(e);
                }

                info!("Add-on {} {} installed", self.slug, record.user.version);
                self.set_state(AddonState::Stopped);
                self.ctx.event_bus.publish_addon_event(AddonEvent::Installed {
                    slug: self.slug.clone(),
                    version: record.user.version,
                    installed_at: Utc::now(),
                });
                Ok(())
            })
            .await
    }

    pub async fn uninstall(&self, remove_config: bool, remove_image: bool) -> Result<(), AddonError> {
        self.instance
            .guarded("addon_uninstall", false, move || async move {
                self.instance.stop(true).await?;
                if remove_image {
                    let persist = self.persist();
                    self.instance.remove_image(&persist.image, &persist.version).await?;
                }

                remove_dir(&self.path_data())
                    .await
                    .map_err(|e| AddonError::io(&self.slug, e))?;
                if remove_config {
                    remove_dir(&self.path_config())
                        .await
                        .map_err(|e| AddonError::io(&self.slug, e))?;
                }

                self.ctx.repository.remove(&self.slug)?;
                self.set_state(AddonState::Unknown);
                info!("Add-on {} uninstalled", self.slug);
                self.ctx.event_bus.publish_addon_event(AddonEvent::Uninstalled {
                    slug: self.slug.clone(),
                    removed_at: Utc::now(),
                });
                Ok(())
            })
            .await
    }

    /// Moves the add-on to the manifest `store`. Returns a startup wait when
    /// the add-on was running before.
    pub async fn update(&self, store: AddonConfig) -> Result<Option<StartupWait>, AddonError> {
        self.instance
            .guarded("addon_update", false, move || async move {
                let old = self.persist();
                let image = store.image_name(&self.ctx.arch);
                let version = store.version.clone();

                self.install_image(&store, &image, &version).await?;

                let was_running = self.is_running().await;
                if was_running {
                    self.stop().await?;
                } else {
                    self.instance.stop(true).await?;
                }

                let mut user = old.clone();
                user.image = image.clone();
                user.version = version.clone();
                self.commit_record(InstalledRecord {
                    system: store.clone(),
                    user,
                })?;

                if old.image != image || old.version != version {
                    if let Err(e) = self.instance.remove_image(&old.image, &old.version).await {
                        warn!("Can't remove old image of {}: {}", self.slug, e);
                    }
                }

                info!("Add-on {} updated from {} to {}", self.slug, old.version, version);
                self.ctx.event_bus.publish_addon_event(AddonEvent::Updated {
                    slug: self.slug.clone(),
                    old_version: old.version,
                    new_version: version,
                    updated_at: Utc::now(),
                });

                if was_running {
                    return Ok(Some(self.start().await?));
                }
                Ok(None)
            })
            .await
    }

    /// Rebuilds the image of a locally built add-on.
    pub async fn rebuild(&self) -> Result<Option<StartupWait>, AddonError> {
        self.instance
            .guarded("addon_rebuild", false, move || async move {
                let config = self.config();
                if !config.is_local_build() {
                    return Err(AddonError::NotSupported(format!(
                        "Can't rebuild an image-based add-on ({})",
                        self.slug
                    )));
                }

                let was_running = self.is_running().await;
                if was_running {
                    self.stop().await?;
                } else {
                    self.instance.stop(true).await?;
                }

                let persist = self.persist();
                self.set_state(AddonState::Rebuild);
                let rebuilt = async {
                    self.instance.remove_image(&persist.image, &persist.version).await?;
                    self.install_image(&config, &persist.image, &persist.version).await
                }
                .await;
                if let Err(e) = rebuilt {
                    self.set_state(AddonState::Error);
                    return Err(e);
                }
                self.set_state(AddonState::Stopped);
                info!("Add-on {} rebuilt", self.slug);

                if was_running {
                    return Ok(Some(self.start().await?));
                }
                Ok(None)
            })
            .await
    }

    /// Reinstalls the image of the current version.
    pub async fn repair(&self) -> Result<(), AddonError> {
        self.instance
            .guarded("addon_repair", false, move || async move {
                let config = self.config();
                let persist = self.persist();
                self.install_image(&config, &persist.image, &persist.version).await
            })
            .await
    }

    // ========================================================================
    // Backup / restore
    // ========================================================================

    /// Writes a backup archive to `target`. Cold backups stop the add-on and
    /// return the startup wait of the restart.
    pub async fn backup(&self, target: &Path) -> Result<Option<StartupWait>, AddonError> {
        self.instance
            .guarded("addon_backup", false, move || async move {
                let config = self.config();
                let persist = self.persist();
                let was_running = self.is_running().await;

                if was_running {
                    match config.backup {
                        BackupMode::Cold => {
                            info!("Stopping {} for a cold backup", self.slug);
                            self.stop().await?;
                        }
                        BackupMode::Hot => {
                            if let Some(command) = &config.backup_pre {
                                self.backup_command(command).await?;
                            }
                        }
                    }
                }

                let written = self.write_backup(target, &config, persist, was_running).await;

                let mut wait = None;
                if was_running {
                    match config.backup {
                        BackupMode::Hot => {
                            if let Some(command) = &config.backup_post {
                                self.backup_command(command).await?;
                            }
                        }
                        BackupMode::Cold => wait = Some(self.start().await?),
                    }
                }

                written?;
                info!("Backup of {} written to {:?}", self.slug, target);
                Ok(wait)
            })
            .await
    }

    async fn write_backup(
        &self,
        target: &Path,
        config: &AddonConfig,
        persist: AddonPersist,
        was_running: bool,
    ) -> Result<(), AddonError> {
        let staging = tempfile::tempdir().map_err(|e| AddonError::io(&self.slug, e))?;

        let image = if config.is_local_build() {
            let path = staging.path().join(addon_backup::IMAGE_FILE);
            self.instance
                .export_image(&persist.image, &persist.version, &path)
                .await
                .map_err(|e| self.backup_error(format!("can't export image: {}", e)))?;
            Some(path)
        } else {
            None
        };

        let exclude = addon_backup::exclude_patterns(&config.backup_exclude)
            .map_err(|e| self.backup_error(format!("invalid exclude pattern: {}", e)))?;
        let metadata = BackupMetadata {
            slug: self.slug.clone(),
            version: persist.version.clone(),
            user: persist,
            system: config.clone(),
            state: if was_running {
                AddonState::Started
            } else {
                AddonState::Stopped
            },
        };

        let target = target.to_path_buf();
        let data = self.path_data();
        tokio::task::spawn_blocking(move || {
            addon_backup::write_archive(&target, &metadata, image.as_deref(), &data, &exclude)
        })
        .await
        .map_err(|e| self.backup_error(e.to_string()))?
        .map_err(|e| self.backup_error(e.to_string()))
    }

    async fn backup_command(&self, command: &str) -> Result<(), AddonError> {
        let CommandResult { exit_code, output } = self
            .instance
            .run_inside(command)
            .await
            .map_err(|e| self.backup_error(format!("backup command failed: {}", e)))?;
        if exit_code != 0 {
            debug!("Backup command output of {}: {}", self.slug, output);
            return Err(self.backup_error(format!(
                "backup command returned error code {}",
                exit_code
            )));
        }
        Ok(())
    }

    /// Restores the add-on from an archive written by [`Addon::backup`].
    /// Returns a startup wait when the add-on was running at backup time.
    pub async fn restore(&self, source: &Path) -> Result<Option<StartupWait>, AddonError> {
        self.instance
            .guarded("addon_restore", false, move || async move {
                let staging = tempfile::tempdir().map_err(|e| AddonError::io(&self.slug, e))?;
                let unpack_to = staging.path().to_path_buf();
                let archive = source.to_path_buf();
                tokio::task::spawn_blocking(move || addon_backup::unpack_archive(&archive, &unpack_to))
                    .await
                    .map_err(|e| self.backup_error(e.to_string()))?
                    .map_err(|e| self.backup_error(format!("can't unpack backup: {}", e)))?;

                let metadata = addon_backup::read_metadata_file(&staging.path().join(addon_backup::METADATA_FILE))
                    .map_err(|e| self.backup_error(format!("can't validate backup metadata: {}", e)))?;
                if metadata.slug != self.slug {
                    return Err(AddonError::Invalid(format!(
                        "Backup is for add-on {}, not {}",
                        metadata.slug, self.slug
                    )));
                }
                self.check_available(&metadata.system)?;

                if self.is_running().await {
                    self.stop().await?;
                } else {
                    self.instance.stop(true).await?;
                }

                let user = &metadata.user;
                let image_file = staging.path().join(addon_backup::IMAGE_FILE);
                if image_file.is_file() {
                    self.instance.import_image(&image_file).await?;
                } else if !self
                    .instance
                    .exists(&user.image, &user.version)
                    .await
                    .unwrap_or(false)
                {
                    self.install_image(&metadata.system, &user.image, &user.version).await?;
                }

                self.commit_record(InstalledRecord {
                    system: metadata.system.clone(),
                    user: metadata.user.clone(),
                })?;

                let data_source = staging.path().join(addon_backup::DATA_DIR);
                let data_target = self.path_data();
                tokio::task::spawn_blocking(move || addon_backup::replace_tree(&data_source, &data_target))
                    .await
                    .map_err(|e| self.backup_error(e.to_string()))?
                    .map_err(|e| self.backup_error(format!("can't restore data: {}", e)))?;

                if metadata.system.apparmor && metadata.system.location.join("apparmor.txt").is_file() {
                    debug!("AppArmor profile of {} is loaded on start", self.slug);
                }

                self.set_state(AddonState::Stopped);
                info!("Add-on {} restored to {}", self.slug, metadata.version);

                if metadata.state == AddonState::Started {
                    return Ok(Some(self.start().await?));
                }
                Ok(None)
            })
            .await
    }

    fn backup_error(&self, message: String) -> AddonError {
        AddonError::Backup {
            slug: self.slug.clone(),
            message,
        }
    }

    // ========================================================================
    // Passthroughs
    // ========================================================================

    pub async fn stats(&self) -> Result<ContainerStats, AddonError> {
        self.instance
            .stats()
            .await
            .map_err(|e| AddonError::docker(&self.slug, e))
    }

    pub async fn logs(&self) -> Result<Vec<u8>, AddonError> {
        self.instance
            .logs()
            .await
            .map_err(|e| AddonError::docker(&self.slug, e))
    }

    pub async fn write_stdin(&self, data: &[u8]) -> Result<(), AddonError> {
        if !self.config().stdin {
            return Err(AddonError::NotSupported(format!(
                "Add-on {} does not support writing to stdin",
                self.slug
            )));
        }
        self.instance
            .write_stdin(data)
            .await
            .map_err(|e| AddonError::docker(&self.slug, e))
    }

    pub async fn run_inside(&self, command: &str) -> Result<CommandResult, AddonError> {
        self.instance
            .run_inside(command)
            .await
            .map_err(|e| AddonError::docker(&self.slug, e))
    }
}

impl AddonDescriptor for Addon {
    fn slug(&self) -> &str {
        &self.slug
    }

    fn config(&self) -> Arc<AddonConfig> {
        self.system.read().clone()
    }

    fn version(&self) -> String {
        self.persist.read().version.clone()
    }

    fn is_installed(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for Addon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Addon")
            .field("slug", &self.slug)
            .field("state", &self.state())
            .finish()
    }
}

/// 64 hex characters.
fn generate_token() -> String {
    format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple())
}

async fn remove_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::addon::options::OptionsError;
    use crate::infrastructure::addons_data::InMemoryAddonsRepository;
    use crate::infrastructure::event_bus::AddonEventReceiver;
    use crate::infrastructure::host::StaticHostProbe;
    use crate::infrastructure::memory_runtime::InMemoryContainerRuntime;

    const IMAGE: &str = "ghcr.io/addons/amd64-ssh";

    struct Fixture {
        _dir: tempfile::TempDir,
        runtime: Arc<InMemoryContainerRuntime>,
        repository: Arc<InMemoryAddonsRepository>,
        event_bus: EventBus,
        ctx: AddonContext,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let runtime = Arc::new(InMemoryContainerRuntime::new());
            let repository = Arc::new(InMemoryAddonsRepository::new());
            let event_bus = EventBus::new(64);
            let ctx = AddonContext {
                runtime: runtime.clone(),
                repository: repository.clone(),
                jobs: Arc::new(JobManager::in_memory()),
                event_bus: event_bus.clone(),
                secrets: Arc::new(SecretsStore::new(dir.path().join("secrets.yaml"))),
                host: Arc::new(StaticHostProbe::new()),
                paths: AddonPaths {
                    data: dir.path().join("addons/data"),
                    configs: dir.path().join("addon_configs"),
                    backup: dir.path().join("backup"),
                },
                arch: "amd64".into(),
                machine: None,
            };
            Self {
                _dir: dir,
                runtime,
                repository,
                event_bus,
                ctx,
            }
        }

        fn config(&self, extra: &str) -> AddonConfig {
            let yaml = format!(
                "name: SSH\nslug: local_ssh\nversion: 9.2.1\nimage: ghcr.io/addons/{{arch}}-ssh\n{}",
                extra
            );
            serde_yaml::from_str(&yaml).unwrap()
        }

        async fn installed(&self, extra: &str) -> Addon {
            let addon = Addon::from_store(self.config(extra), self.ctx.clone());
            addon.install().await.unwrap();
            addon
        }
    }

    fn state_events(receiver: &mut AddonEventReceiver) -> Vec<AddonState> {
        let mut states = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            if let AddonEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        states
    }

    #[tokio::test]
    async fn test_set_state_is_idempotent() {
        let fixture = Fixture::new();
        let addon = Addon::from_store(fixture.config(""), fixture.ctx.clone());
        let mut events = fixture.event_bus.subscribe_addon("local_ssh");

        assert!(addon.set_state(AddonState::Stopped));
        assert!(!addon.set_state(AddonState::Stopped));
        assert_eq!(state_events(&mut events), vec![AddonState::Stopped]);
    }

    #[tokio::test]
    async fn test_load_without_container_stays_unknown() {
        let fixture = Fixture::new();
        let addon = Addon::from_store(fixture.config(""), fixture.ctx.clone());
        addon.load().await;
        assert_eq!(addon.state(), AddonState::Unknown);
    }

    #[tokio::test]
    async fn test_start_writes_options_and_token() {
        let fixture = Fixture::new();
        let addon = fixture
            .installed("options:\n  port: 22\nschema:\n  port: port\n  motd: str?\n")
            .await;
        let mut events = fixture.event_bus.subscribe_addon("local_ssh");

        let wait = addon.start().await.unwrap();
        wait.await.unwrap();

        assert_eq!(addon.state(), AddonState::Started);
        assert_eq!(state_events(&mut events), vec![AddonState::Started]);

        let token = addon.persist().access_token.unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));

        let written = std::fs::read_to_string(addon.path_data().join("options.json")).unwrap();
        let written: Value = serde_json::from_str(&written).unwrap();
        assert_eq!(written["port"], 22);

        let container = fixture.runtime.container("addon_local_ssh").unwrap();
        let spec = container.spec.unwrap();
        assert_eq!(spec.hostname, "local-ssh");
        assert_eq!(spec.env.get("SUPERVISOR_TOKEN"), Some(&token));
    }

    #[tokio::test]
    async fn test_start_when_running_is_noop() {
        let fixture = Fixture::new();
        let addon = fixture.installed("").await;
        fixture.runtime.with_container("addon_local_ssh", IMAGE, "9.2.1", true);

        addon.start().await.unwrap().await.unwrap();
        assert_eq!(fixture.runtime.call_count("run"), 0);
        assert_eq!(addon.state(), AddonState::Stopped);
    }

    #[tokio::test]
    async fn test_start_docker_failure_sets_error() {
        let fixture = Fixture::new();
        let addon = fixture.installed("").await;
        fixture.runtime.fail_on("run");

        let err = addon.start().await.err().expect("start should fail");
        assert!(matches!(err, AddonError::Docker { .. }));
        assert_eq!(addon.state(), AddonState::Error);
        assert!(!addon.instance().group().is_locked());
    }

    #[tokio::test]
    async fn test_invalid_options_keep_state() {
        let fixture = Fixture::new();
        let addon = fixture.installed("schema:\n  password: password\n").await;

        let err = addon.start().await.err().expect("start should fail");
        assert!(matches!(err, AddonError::Configuration { .. }));
        assert!(!err.should_capture());
        assert_eq!(addon.state(), AddonState::Stopped);
        assert_eq!(fixture.runtime.call_count("run"), 0);

        // The validator reports the missing key by name.
        let missing = OptionsError::Missing("password".into()).to_string();
        assert!(err.to_string().contains(&missing));
    }

    #[tokio::test]
    async fn test_restart_never_started_addon() {
        let fixture = Fixture::new();
        let addon = fixture.installed("").await;
        addon.restart().await.unwrap().await.unwrap();
        assert_eq!(addon.state(), AddonState::Started);
        assert!(fixture.ctx.jobs.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_stop_failure_sets_error() {
        let fixture = Fixture::new();
        let addon = fixture.installed("").await;
        addon.start().await.unwrap();
        fixture.runtime.fail_on("stop");

        assert!(addon.stop().await.is_err());
        assert_eq!(addon.state(), AddonState::Error);
    }

    #[tokio::test]
    async fn test_write_stdin_requires_flag() {
        let fixture = Fixture::new();
        let addon = fixture.installed("").await;
        addon.start().await.unwrap();
        assert!(matches!(
            addon.write_stdin(b"hello").await,
            Err(AddonError::NotSupported(_))
        ));

        let fixture = Fixture::new();
        let addon = fixture.installed("stdin: true\n").await;
        addon.start().await.unwrap();
        addon.write_stdin(b"hello").await.unwrap();
        assert_eq!(fixture.runtime.container("addon_local_ssh").unwrap().stdin, b"hello");
    }

    #[tokio::test]
    async fn test_update_restarts_running_addon() {
        let fixture = Fixture::new();
        let addon = fixture.installed("").await;
        addon.start().await.unwrap();

        let mut store = fixture.config("");
        store.version = "9.3.0".into();
        let wait = addon.update(store).await.unwrap();
        wait.expect("running add-on is restarted").await.unwrap();

        assert_eq!(addon.version(), "9.3.0");
        assert_eq!(addon.state(), AddonState::Started);
        assert!(fixture.runtime.has_image(IMAGE, "9.3.0"));
        assert!(!fixture.runtime.has_image(IMAGE, "9.2.1"));
        assert_eq!(fixture.repository.get("local_ssh").unwrap().user.version, "9.3.0");
    }

    #[tokio::test]
    async fn test_rebuild_rejects_image_addon() {
        let fixture = Fixture::new();
        let addon = fixture.installed("").await;
        assert!(matches!(addon.rebuild().await, Err(AddonError::NotSupported(_))));
    }

    #[tokio::test]
    async fn test_cold_backup_and_restore() {
        let fixture = Fixture::new();
        let addon = fixture.installed("backup: cold\n").await;
        addon.set_options(serde_json::json!({"motd": "hi"})).unwrap();
        addon.start().await.unwrap();
        std::fs::write(addon.path_data().join("state.db"), "rows").unwrap();

        let archive = fixture.ctx.paths.data.join("../local_ssh.tar");
        let wait = addon.backup(&archive).await.unwrap();
        wait.expect("cold backup restarts").await.unwrap();
        assert_eq!(addon.state(), AddonState::Started);

        std::fs::remove_file(addon.path_data().join("state.db")).unwrap();
        addon.set_options(serde_json::json!({})).unwrap();

        let wait = addon.restore(&archive).await.unwrap();
        wait.expect("started add-on restarts").await.unwrap();
        assert_eq!(addon.state(), AddonState::Started);
        assert_eq!(addon.persist().options["motd"], "hi");
        assert_eq!(
            std::fs::read_to_string(addon.path_data().join("state.db")).unwrap(),
            "rows"
        );
    }

    #[tokio::test]
    async fn test_hot_backup_runs_commands() {
        let fixture = Fixture::new();
        let addon = fixture
            .installed("backup_pre: /bin/pre\nbackup_post: /bin/post\n")
            .await;
        addon.start().await.unwrap();

        let archive = fixture.ctx.paths.data.join("../hot.tar");
        assert!(addon.backup(&archive).await.unwrap().is_none());
        assert_eq!(fixture.runtime.call_count("run_inside"), 2);
        assert_eq!(addon.state(), AddonState::Started);
    }

    #[tokio::test]
    async fn test_uninstall_removes_records() {
        let fixture = Fixture::new();
        let addon = fixture.installed("").await;
        addon.start().await.unwrap();

        addon.uninstall(true, true).await.unwrap();
        assert!(fixture.repository.get("local_ssh").is_none());
        assert!(!addon.path_data().exists());
        assert!(!fixture.runtime.has_image(IMAGE, "9.2.1"));
        assert_eq!(addon.state(), AddonState::Unknown);
    }
}
