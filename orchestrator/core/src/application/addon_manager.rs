// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Add-on Manager Application Service
//!
//! Fleet-level orchestration over the installed add-ons and the store
//! catalog. Per-call failures are returned to the caller; failures inside
//! batch operations (boot, shutdown, DNS sync, repair) are turned into
//! resolution issues or captured so one add-on cannot block the others.

use crate::application::addon::{Addon, AddonContext, StartupWait};
use crate::application::job_conditions::ConditionChecker;
use crate::application::resolution::ResolutionCenter;
use crate::domain::addon::{AddonBoot, AddonDescriptor, AddonError, AddonStartup, AddonState};
use crate::domain::discovery::DiscoveryRegistry;
use crate::domain::dns::{addon_hostnames, DnsHosts};
use crate::domain::job::JobCondition;
use crate::domain::repository::AddonsRepository;
use crate::domain::resolution::{ContextType, IssueType, SuggestionType};
use crate::infrastructure::store_loader::StoreCatalog;
use crate::infrastructure::telemetry::capture_error;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const INSTALL_CONDITIONS: [JobCondition; 3] = [
    JobCondition::FreeSpace,
    JobCondition::InternetHost,
    JobCondition::Healthy,
];
const RESTORE_CONDITIONS: [JobCondition; 2] = [JobCondition::FreeSpace, JobCondition::Healthy];

pub struct AddonManager {
    ctx: AddonContext,
    store: Arc<StoreCatalog>,
    resolution: Arc<ResolutionCenter>,
    conditions: Arc<ConditionChecker>,
    discovery: Arc<DiscoveryRegistry>,
    dns: Arc<dyn DnsHosts>,
    wait_boot: Duration,
    local: RwLock<BTreeMap<String, Arc<Addon>>>,
    /// Slugs with an install in flight.
    installing: Mutex<HashSet<String>>,
}

/// Releases an install reservation on drop.
struct InstallReservation<'a> {
    installing: &'a Mutex<HashSet<String>>,
    slug: String,
}

impl Drop for InstallReservation<'_> {
    fn drop(&mut self) {
        self.installing.lock().remove(&self.slug);
    }
}

impl AddonManager {
    pub fn new(
        ctx: AddonContext,
        store: Arc<StoreCatalog>,
        resolution: Arc<ResolutionCenter>,
        conditions: Arc<ConditionChecker>,
        discovery: Arc<DiscoveryRegistry>,
        dns: Arc<dyn DnsHosts>,
        wait_boot: Duration,
    ) -> Self {
        Self {
            ctx,
            store,
            resolution,
            conditions,
            discovery,
            dns,
            wait_boot,
            local: RwLock::new(BTreeMap::new()),
            installing: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<StoreCatalog> {
        &self.store
    }

    pub fn repository(&self) -> &Arc<dyn AddonsRepository> {
        &self.ctx.repository
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Installed add-ons sorted by slug.
    pub fn installed(&self) -> Vec<Arc<Addon>> {
        self.local.read().values().cloned().collect()
    }

    pub fn get_local(&self, slug: &str) -> Option<Arc<Addon>> {
        self.local.read().get(slug).cloned()
    }

    /// Installed add-on first, then the store unless `local_only`.
    pub fn get(&self, slug: &str, local_only: bool) -> Option<Arc<dyn AddonDescriptor>> {
        if let Some(addon) = self.get_local(slug) {
            return Some(addon as Arc<dyn AddonDescriptor>);
        }
        if local_only {
            return None;
        }
        self.store
            .get(slug)
            .map(|addon| Arc::new(addon) as Arc<dyn AddonDescriptor>)
    }

    /// Every installed add-on plus every store add-on not installed.
    pub fn all(&self) -> Vec<Arc<dyn AddonDescriptor>> {
        let mut all: Vec<Arc<dyn AddonDescriptor>> = self
            .installed()
            .into_iter()
            .map(|addon| addon as Arc<dyn AddonDescriptor>)
            .collect();
        all.extend(
            self.store
                .all()
                .into_iter()
                .filter(|addon| !self.local.read().contains_key(addon.slug()))
                .map(|addon| Arc::new(addon) as Arc<dyn AddonDescriptor>),
        );
        all
    }

    fn require_local(&self, slug: &str) -> Result<Arc<Addon>, AddonError> {
        self.get_local(slug)
            .ok_or_else(|| AddonError::NotInstalled(slug.to_string()))
    }

    // ========================================================================
    // Load / boot / shutdown
    // ========================================================================

    /// Rescans the store, creates an add-on object per stored record and
    /// attaches all of them to Docker concurrently.
    pub async fn load(&self) {
        let available = self.store.refresh().await;
        debug!("Store lists {} add-ons", available);

        let mut loaded = Vec::new();
        for slug in self.ctx.repository.installed() {
            let Some(record) = self.ctx.repository.get(&slug) else {
                continue;
            };
            let addon = Arc::new(Addon::new(record, self.ctx.clone()));
            self.local.write().insert(slug, addon.clone());
            loaded.push(addon);
        }

        join_all(loaded.iter().map(|addon| addon.load())).await;
        info!("Found {} installed add-ons", loaded.len());

        self.sync_dns().await;
    }

    /// Starts the `boot: auto` add-ons of `stage` one after the other. A
    /// failing start becomes a resolution issue.
    pub async fn boot(&self, stage: AddonStartup) {
        let tasks: Vec<Arc<Addon>> = self
            .installed()
            .into_iter()
            .filter(|addon| addon.boot() == AddonBoot::Auto && addon.config().startup == stage)
            .collect();
        if tasks.is_empty() {
            return;
        }
        info!("Phase '{}' starting {} add-ons", stage, tasks.len());

        let mut waits: Vec<StartupWait> = Vec::new();
        for addon in tasks {
            match addon.start().await {
                Ok(wait) => waits.push(wait),
                Err(e) => {
                    warn!("Can't start add-on {}: {}", addon.slug(), e);
                    self.resolution.create_issue(
                        IssueType::BootFail,
                        ContextType::Addon,
                        Some(addon.slug().to_string()),
                        &[SuggestionType::ExecuteStart, SuggestionType::DisableBoot],
                    );
                    if e.should_capture() {
                        capture_error("addons.boot", &e);
                    }
                }
            }
        }

        if waits.is_empty() {
            return;
        }
        tokio::time::sleep(self.wait_boot).await;
        for result in join_all(waits).await {
            if let Err(e) = result {
                warn!("Add-on failed during boot: {}", e);
            }
        }
    }

    /// Stops the started add-ons of `stage` one after the other.
    pub async fn shutdown(&self, stage: AddonStartup) {
        let tasks: Vec<Arc<Addon>> = self
            .installed()
            .into_iter()
            .filter(|addon| addon.state() == AddonState::Started && addon.config().startup == stage)
            .collect();
        if tasks.is_empty() {
            return;
        }
        info!("Phase '{}' stopping {} add-ons", stage, tasks.len());

        for addon in tasks {
            if let Err(e) = addon.stop().await {
                warn!("Can't stop add-on {}: {}", addon.slug(), e);
                capture_error("addons.shutdown", &e);
            }
        }
    }

    // ========================================================================
    // Install / uninstall / update / rebuild / restore
    // ========================================================================

    pub async fn install(&self, slug: &str) -> Result<(), AddonError> {
        let _reservation = self.reserve_install(slug)?;
        let store = self
            .store
            .get(slug)
            .ok_or_else(|| AddonError::NotFound(slug.to_string()))?;

        let job = self.ctx.jobs.new_job("addon_manager_install", Some(slug.to_string()));
        let result: Result<(), AddonError> = async {
            self.conditions.ensure(&job, &INSTALL_CONDITIONS).await?;
            let addon = Arc::new(Addon::from_store((*store.config()).clone(), self.ctx.clone()));
            addon.check_available(&store.config())?;

            job.scope(addon.install()).await?;
            self.local.write().insert(slug.to_string(), addon);
            Ok(())
        }
        .await;
        job.finish();
        result
    }

    /// Claims `slug` for one install; a second concurrent call sees it as
    /// already installed.
    fn reserve_install(&self, slug: &str) -> Result<InstallReservation<'_>, AddonError> {
        let mut installing = self.installing.lock();
        if self.local.read().contains_key(slug) || !installing.insert(slug.to_string()) {
            return Err(AddonError::AlreadyInstalled(slug.to_string()));
        }
        Ok(InstallReservation {
            installing: &self.installing,
            slug: slug.to_string(),
        })
    }

    pub async fn uninstall(&self, slug: &str, remove_config: bool) -> Result<(), AddonError> {
        let addon = self.require_local(slug)?;
        let persist = addon.persist();

        // Another installed add-on may run from the same image.
        let shared = self.installed().iter().any(|other| {
            other.slug() != slug && {
                let other = other.persist();
                other.image == persist.image && other.version == persist.version
            }
        });

        addon.uninstall(remove_config, !shared).await?;
        self.local.write().remove(slug);

        let removed = self.discovery.remove_addon(slug);
        if removed > 0 {
            debug!("Removed {} discovery messages of {}", removed, slug);
        }
        for name in addon_hostnames(slug) {
            self.dns.remove_host(&name);
        }
        if let Err(e) = self.dns.flush().await {
            warn!("Can't write hosts file: {}", e);
        }
        self.resolution.dismiss_reference(ContextType::Addon, slug);
        Ok(())
    }

    /// Updates to the store version. Returns a startup wait when the add-on
    /// was running before the update.
    pub async fn update(&self, slug: &str, backup: bool) -> Result<Option<StartupWait>, AddonError> {
        let addon = self.require_local(slug)?;
        let store = self.store.get(slug).ok_or_else(|| {
            AddonError::Invalid(format!("Add-on {} is not available in the store anymore", slug))
        })?;
        if store.version() == addon.version() {
            return Err(AddonError::Invalid(format!(
                "No update available for add-on {}",
                slug
            )));
        }

        let job = self.ctx.jobs.new_job("addon_manager_update", Some(slug.to_string()));
        let result: Result<Option<StartupWait>, AddonError> = async {
            self.conditions.ensure(&job, &INSTALL_CONDITIONS).await?;
            addon.check_available(&store.config())?;

            if backup {
                self.backup_addon(slug).await?;
            }
            job.scope(addon.update((*store.config()).clone())).await
        }
        .await;
        job.finish();
        result
    }

    /// Rebuilds a locally built add-on whose version did not change.
    pub async fn rebuild(&self, slug: &str) -> Result<Option<StartupWait>, AddonError> {
        let addon = self.require_local(slug)?;
        if let Some(store) = self.store.get(slug) {
            if store.version() != addon.version() {
                return Err(AddonError::Invalid(format!(
                    "Version of {} changed, use update instead of rebuild",
                    slug
                )));
            }
        }
        if !addon.config().is_local_build() {
            return Err(AddonError::NotSupported(format!(
                "Can't rebuild an image-based add-on ({})",
                slug
            )));
        }

        let job = self.ctx.jobs.new_job("addon_manager_rebuild", Some(slug.to_string()));
        let result: Result<Option<StartupWait>, AddonError> = async {
            self.conditions.ensure(&job, &RESTORE_CONDITIONS).await?;
            job.scope(addon.rebuild()).await
        }
        .await;
        job.finish();
        result
    }

    /// Restores an add-on from a backup archive, installing it if needed.
    pub async fn restore(&self, slug: &str, archive: &Path) -> Result<Option<StartupWait>, AddonError> {
        let job = self.ctx.jobs.new_job("addon_manager_restore", Some(slug.to_string()));
        let result: Result<Option<StartupWait>, AddonError> = async {
            self.conditions.ensure(&job, &RESTORE_CONDITIONS).await?;

            let addon = match self.get_local(slug) {
                Some(addon) => addon,
                None => {
                    let source = archive.to_path_buf();
                    let metadata = tokio::task::spawn_blocking(move || {
                        crate::application::addon_backup::read_metadata(&source)
                    })
                    .await
                    .map_err(|e| backup_error(slug, e.to_string()))?
                    .map_err(|e| backup_error(slug, format!("can't read backup: {}", e)))?;
                    Arc::new(Addon::new(
                        crate::domain::repository::InstalledRecord {
                            system: metadata.system,
                            user: metadata.user,
                        },
                        self.ctx.clone(),
                    ))
                }
            };

            let wait = job.scope(addon.restore(archive)).await?;
            self.local.write().insert(slug.to_string(), addon);
            Ok(wait)
        }
        .await;
        job.finish();
        result
    }

    /// Writes `<backup>/<slug>-<version>-<timestamp>.tar`.
    pub async fn backup_addon(&self, slug: &str) -> Result<PathBuf, AddonError> {
        let addon = self.require_local(slug)?;
        let target = self.ctx.paths.backup.join(format!(
            "{}-{}-{}.tar",
            slug,
            addon.version(),
            chrono::Utc::now().format("%Y%m%d%H%M%S")
        ));
        tokio::fs::create_dir_all(&self.ctx.paths.backup)
            .await
            .map_err(|e| AddonError::io(slug, e))?;

        if let Some(wait) = addon.backup(&target).await? {
            wait.await?;
        }
        Ok(target)
    }

    // ========================================================================
    // Single add-on lifecycle
    // ========================================================================

    pub async fn start(&self, slug: &str) -> Result<StartupWait, AddonError> {
        self.require_local(slug)?.start().await
    }

    pub async fn stop(&self, slug: &str) -> Result<(), AddonError> {
        self.require_local(slug)?.stop().await
    }

    pub async fn restart(&self, slug: &str) -> Result<StartupWait, AddonError> {
        self.require_local(slug)?.restart().await
    }

    // ========================================================================
    // Repair / DNS
    // ========================================================================

    /// Reinstalls add-ons whose image is gone. Add-ons that can't be repaired
    /// are uninstalled.
    pub async fn repair(&self) {
        for addon in self.installed() {
            let slug = addon.slug().to_string();
            match addon.exists().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!("Can't check image of add-on {}, skipping repair: {}", slug, e);
                    continue;
                }
            }
            warn!("Image of add-on {} is missing, repairing", slug);
            if let Err(e) = self.repair_addon(&slug).await {
                warn!("Can't repair add-on {}: {}", slug, e);
            }
        }
    }

    /// Reinstalls one add-on's image; force-uninstalls it when that fails.
    /// The record is only dropped once Docker confirmed the image is gone.
    pub async fn repair_addon(&self, slug: &str) -> Result<(), AddonError> {
        let addon = self.require_local(slug)?;
        if addon.exists().await.map_err(|e| AddonError::docker(slug, e))? {
            debug!("Image of add-on {} is present, nothing to repair", slug);
            return Ok(());
        }
        match addon.repair().await {
            Ok(()) => {
                info!("Add-on {} repaired", slug);
                Ok(())
            }
            Err(e) => {
                warn!("Repair of {} failed, removing it: {}", slug, e);
                if e.should_capture() {
                    capture_error("addons.repair", &e);
                }
                match self.uninstall(slug, false).await {
                    Ok(()) => {}
                    // Docker still holds the container; keep the record for the next pass.
                    Err(uninstall @ AddonError::Docker { .. }) => {
                        capture_error("addons.repair", &uninstall);
                        warn!("Can't remove unrepairable add-on {}: {}", slug, uninstall);
                    }
                    Err(uninstall) => {
                        capture_error("addons.repair", &uninstall);
                        self.local.write().remove(slug);
                        self.ctx.repository.remove(slug)?;
                        self.discovery.remove_addon(slug);
                    }
                }
                Err(e)
            }
        }
    }

    /// Registers the hostnames of running add-ons and writes the hosts file
    /// once.
    pub async fn sync_dns(&self) {
        let running: Vec<Arc<Addon>> = self
            .installed()
            .into_iter()
            .filter(|addon| addon.state() == AddonState::Started)
            .collect();

        let lookups = join_all(running.iter().map(|addon| async move {
            (addon.slug().to_string(), addon.instance().ip_address().await)
        }))
        .await;

        for (slug, lookup) in lookups {
            match lookup {
                Ok(Some(ip)) => self.dns.add_host(ip, addon_hostnames(&slug)),
                Ok(None) => debug!("Add-on {} has no address", slug),
                Err(e) => {
                    warn!("Can't read address of add-on {}: {}", slug, e);
                    self.resolution.create_issue(
                        IssueType::CorruptDocker,
                        ContextType::Addon,
                        Some(slug),
                        &[],
                    );
                }
            }
        }

        if let Err(e) = self.dns.flush().await {
            warn!("Can't write hosts file: {}", e);
        }
    }
}

fn backup_error(slug: &str, message: String) -> AddonError {
    AddonError::Backup {
        slug: slug.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::addon::AddonPaths;
    use crate::application::job_manager::JobManager;
    use crate::domain::addon::AddonConfig;
    use crate::domain::core_state::{CoreState, CoreStateHandle};
    use crate::domain::runtime::ContainerRuntime;
    use crate::infrastructure::addons_data::InMemoryAddonsRepository;
    use crate::infrastructure::event_bus::EventBus;
    use crate::infrastructure::host::StaticHostProbe;
    use crate::infrastructure::hosts_file::HostsFile;
    use crate::infrastructure::memory_runtime::InMemoryContainerRuntime;
    use crate::infrastructure::secrets::SecretsStore;

    struct Fixture {
        dir: tempfile::TempDir,
        runtime: Arc<InMemoryContainerRuntime>,
        resolution: Arc<ResolutionCenter>,
        manager: AddonManager,
    }

    fn manifest(slug: &str, extra: &str) -> AddonConfig {
        serde_yaml::from_str(&format!(
            "name: {slug}\nslug: {slug}\nversion: '1.0'\nimage: ghcr.io/addons/{slug}\n{extra}"
        ))
        .unwrap()
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Arc::new(InMemoryContainerRuntime::new());
        let event_bus = EventBus::new(64);
        let jobs = Arc::new(JobManager::in_memory());
        let host = Arc::new(StaticHostProbe::new());
        let resolution = Arc::new(ResolutionCenter::new(event_bus.clone()));
        let conditions = Arc::new(ConditionChecker::new(
            jobs.clone(),
            resolution.clone(),
            host.clone(),
            CoreStateHandle::new(CoreState::Running),
            dir.path().to_path_buf(),
            1024,
        ));
        let ctx = AddonContext {
            runtime: runtime.clone(),
            repository: Arc::new(InMemoryAddonsRepository::new()),
            jobs,
            event_bus,
            secrets: Arc::new(SecretsStore::new(dir.path().join("secrets.yaml"))),
            host,
            paths: AddonPaths {
                data: dir.path().join("addons"),
                configs: dir.path().join("addon_configs"),
                backup: dir.path().join("backup"),
            },
            arch: "amd64".into(),
            machine: None,
        };
        let manager = AddonManager::new(
            ctx,
            Arc::new(StoreCatalog::new(Vec::new())),
            resolution.clone(),
            conditions,
            Arc::new(DiscoveryRegistry::new()),
            Arc::new(HostsFile::new(dir.path().join("hosts"))),
            Duration::from_millis(1),
        );
        Fixture {
            dir,
            runtime,
            resolution,
            manager,
        }
    }

    #[tokio::test]
    async fn test_install_rejections() {
        let f = fixture();
        assert!(matches!(
            f.manager.install("missing").await,
            Err(AddonError::NotFound(_))
        ));

        f.manager.store().insert(manifest("mqtt", ""));
        f.manager.install("mqtt").await.unwrap();
        assert!(f.manager.get_local("mqtt").is_some());
        assert!(matches!(
            f.manager.install("mqtt").await,
            Err(AddonError::AlreadyInstalled(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_install_runs_once() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));

        let (first, second) = tokio::join!(f.manager.install("mqtt"), f.manager.install("mqtt"));
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(AddonError::AlreadyInstalled(_)))));
        assert_eq!(f.manager.installed().len(), 1);
        assert_eq!(f.manager.repository().installed().len(), 1);
    }

    #[tokio::test]
    async fn test_install_in_flight_blocks_duplicate() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));

        let reservation = f.manager.reserve_install("mqtt").unwrap();
        assert!(matches!(
            f.manager.install("mqtt").await,
            Err(AddonError::AlreadyInstalled(_))
        ));
        drop(reservation);

        f.manager.install("mqtt").await.unwrap();
        assert!(f.manager.installing.lock().is_empty());
    }

    #[tokio::test]
    async fn test_install_checks_architecture() {
        let f = fixture();
        f.manager.store().insert(manifest("rpi", "arch: [aarch64]\n"));
        assert!(matches!(
            f.manager.install("rpi").await,
            Err(AddonError::NotSupported(_))
        ));
        assert!(f.manager.installed().is_empty());
        assert!(f.manager.repository().installed().is_empty());
    }

    #[tokio::test]
    async fn test_get_prefers_local() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));
        assert!(!f.manager.get("mqtt", false).unwrap().is_installed());
        assert!(f.manager.get("mqtt", true).is_none());

        f.manager.install("mqtt").await.unwrap();
        assert!(f.manager.get("mqtt", true).unwrap().is_installed());
        assert_eq!(f.manager.all().len(), 1);
    }

    #[tokio::test]
    async fn test_uninstall_keeps_shared_image() {
        let f = fixture();
        f.manager.store().insert(manifest("a", ""));
        let mut b = manifest("b", "");
        b.image = Some("ghcr.io/addons/a".into());
        f.manager.store().insert(b);
        f.manager.install("a").await.unwrap();
        f.manager.install("b").await.unwrap();

        f.manager.uninstall("a", false).await.unwrap();
        assert!(f.runtime.has_image("ghcr.io/addons/a", "1.0"));

        f.manager.uninstall("b", false).await.unwrap();
        assert!(!f.runtime.has_image("ghcr.io/addons/a", "1.0"));
    }

    #[tokio::test]
    async fn test_update_rejections() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));
        assert!(matches!(
            f.manager.update("mqtt", false).await,
            Err(AddonError::NotInstalled(_))
        ));

        f.manager.install("mqtt").await.unwrap();
        assert!(matches!(
            f.manager.update("mqtt", false).await,
            Err(AddonError::Invalid(_))
        ));

        f.manager.store().remove("mqtt");
        assert!(matches!(
            f.manager.update("mqtt", false).await,
            Err(AddonError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_update_with_backup() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));
        f.manager.install("mqtt").await.unwrap();

        let mut newer = manifest("mqtt", "");
        newer.version = "1.1".into();
        f.manager.store().insert(newer);

        let wait = f.manager.update("mqtt", true).await.unwrap();
        assert!(wait.is_none());
        assert_eq!(f.manager.get_local("mqtt").unwrap().version(), "1.1");
        let backups: Vec<_> = std::fs::read_dir(f.dir.path().join("backup")).unwrap().collect();
        assert_eq!(backups.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_image_addon_rejected() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));
        f.manager.install("mqtt").await.unwrap();
        assert!(matches!(
            f.manager.rebuild("mqtt").await,
            Err(AddonError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_repair_reinstalls_missing_image() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));
        f.manager.install("mqtt").await.unwrap();
        f.runtime.remove_image("ghcr.io/addons/mqtt", "1.0").await.unwrap();

        f.manager.repair().await;
        assert!(f.runtime.has_image("ghcr.io/addons/mqtt", "1.0"));
        assert!(f.manager.get_local("mqtt").is_some());
    }

    #[tokio::test]
    async fn test_repair_uninstalls_unrepairable_addon() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));
        f.manager.install("mqtt").await.unwrap();
        f.runtime.remove_image("ghcr.io/addons/mqtt", "1.0").await.unwrap();
        f.runtime.fail_on("install");

        f.manager.repair().await;
        assert!(f.manager.get_local("mqtt").is_none());
        assert!(f.manager.repository().get("mqtt").is_none());
    }

    #[tokio::test]
    async fn test_repair_keeps_addon_when_docker_unreachable() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));
        f.manager.install("mqtt").await.unwrap();
        for op in ["image_exists", "install", "stop", "remove_image"] {
            f.runtime.fail_on(op);
        }

        f.manager.repair().await;
        assert!(f.manager.get_local("mqtt").is_some());
        assert!(f.manager.repository().get("mqtt").is_some());
        assert!(matches!(
            f.manager.repair_addon("mqtt").await,
            Err(AddonError::Docker { .. })
        ));
        assert!(f.manager.get_local("mqtt").is_some());
    }

    #[tokio::test]
    async fn test_repair_keeps_record_while_stop_fails() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));
        f.manager.install("mqtt").await.unwrap();
        f.runtime.remove_image("ghcr.io/addons/mqtt", "1.0").await.unwrap();
        f.runtime.fail_on("install");
        f.runtime.fail_on("stop");

        f.manager.repair().await;
        assert!(f.manager.get_local("mqtt").is_some());
        assert!(f.manager.repository().get("mqtt").is_some());
    }

    #[tokio::test]
    async fn test_sync_dns_raises_issue_on_docker_failure() {
        let f = fixture();
        f.manager.store().insert(manifest("mqtt", ""));
        f.manager.install("mqtt").await.unwrap();
        f.manager.start("mqtt").await.unwrap();
        f.runtime.fail_on("ip_address");

        f.manager.sync_dns().await;
        let issues = f.resolution.issues();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::CorruptDocker);
        assert_eq!(issues[0].reference.as_deref(), Some("mqtt"));
    }

    #[tokio::test]
    async fn test_shutdown_continues_after_failure() {
        let f = fixture();
        for slug in ["a", "b"] {
            f.manager.store().insert(manifest(slug, ""));
            f.manager.install(slug).await.unwrap();
            f.manager.start(slug).await.unwrap();
        }
        f.runtime.fail_on("stop");

        f.manager.shutdown(AddonStartup::Application).await;
        // Both stops were attempted.
        assert_eq!(
            f.runtime
                .calls()
                .iter()
                .filter(|c| c.as_str() == "stop:addon_a" || c.as_str() == "stop:addon_b")
                .count(),
            4
        );
    }
}
