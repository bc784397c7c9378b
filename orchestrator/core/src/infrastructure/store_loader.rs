// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Add-on Store Catalog
//!
//! Scans repository directories for add-on manifests. A repository is a
//! directory whose sub-directories each contain one `config.yaml`,
//! `config.yml` or `config.json`. Store slugs are prefixed with the repository
//! name, so the `ssh` add-on of the `local` repository becomes `local_ssh`.

use crate::domain::addon::{AddonConfig, CatalogAddon};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const MANIFEST_FILES: [&str; 3] = ["config.yaml", "config.yml", "config.json"];

#[derive(Default)]
pub struct StoreCatalog {
    repositories: Vec<PathBuf>,
    addons: RwLock<BTreeMap<String, CatalogAddon>>,
}

impl StoreCatalog {
    pub fn new(repositories: Vec<PathBuf>) -> Self {
        Self {
            repositories,
            addons: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn repositories(&self) -> &[PathBuf] {
        &self.repositories
    }

    /// Rescans every repository and replaces the catalog. Broken manifests
    /// are logged and skipped.
    pub async fn refresh(&self) -> usize {
        let repositories = self.repositories.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            repositories.iter().flat_map(|repo| scan_repository(repo)).collect::<Vec<_>>()
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Store scan task failed: {}", e);
            Vec::new()
        });

        let mut addons = BTreeMap::new();
        for config in scanned {
            if addons.contains_key(&config.slug) {
                warn!("Duplicate store add-on {}, keeping the first one", config.slug);
                continue;
            }
            addons.insert(config.slug.clone(), CatalogAddon::new(config));
        }

        let count = addons.len();
        *self.addons.write() = addons;
        info!("Loaded {} add-ons from {} repositories", count, self.repositories.len());
        count
    }

    pub fn get(&self, slug: &str) -> Option<CatalogAddon> {
        self.addons.read().get(slug).cloned()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.addons.read().contains_key(slug)
    }

    pub fn all(&self) -> Vec<CatalogAddon> {
        self.addons.read().values().cloned().collect()
    }

    /// Adds an add-on directly, bypassing repository scanning.
    pub fn insert(&self, config: AddonConfig) {
        self.addons.write().insert(config.slug.clone(), CatalogAddon::new(config));
    }

    pub fn remove(&self, slug: &str) -> bool {
        self.addons.write().remove(slug).is_some()
    }
}

fn scan_repository(repository: &Path) -> Vec<AddonConfig> {
    let Some(repo_slug) = repository.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
        warn!("Invalid repository path {:?}", repository);
        return Vec::new();
    };

    WalkDir::new(repository)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Can't read repository {:?}: {}", repository, e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| MANIFEST_FILES.contains(&name))
        })
        .filter_map(|entry| match read_manifest(entry.path()) {
            Ok(mut config) => {
                config.slug = format!("{}_{}", repo_slug, config.slug);
                config.repository = repo_slug.clone();
                config.location = entry.path().parent().map(Path::to_path_buf).unwrap_or_default();
                debug!("Found add-on {} in {:?}", config.slug, config.location);
                Some(config)
            }
            Err(e) => {
                warn!("Can't read add-on manifest {:?}: {}", entry.path(), e);
                None
            }
        })
        .collect()
}

fn read_manifest(path: &Path) -> anyhow::Result<AddonConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = if path.extension().is_some_and(|ext| ext == "json") {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::addon::AddonDescriptor;

    #[tokio::test]
    async fn test_refresh_scans_repositories() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("local");
        std::fs::create_dir_all(repo.join("ssh")).unwrap();
        std::fs::create_dir_all(repo.join("mqtt")).unwrap();
        std::fs::create_dir_all(repo.join("broken")).unwrap();
        std::fs::write(repo.join("ssh/config.yaml"), "name: SSH\nslug: ssh\nversion: 9.2.1\n").unwrap();
        std::fs::write(
            repo.join("mqtt/config.json"),
            r#"{"name": "MQTT", "slug": "mqtt", "version": "6.0.0", "image": "ghcr.io/mqtt"}"#,
        )
        .unwrap();
        std::fs::write(repo.join("broken/config.yaml"), "name: [").unwrap();

        let catalog = StoreCatalog::new(vec![repo.clone()]);
        assert_eq!(catalog.refresh().await, 2);

        let ssh = catalog.get("local_ssh").unwrap();
        assert_eq!(ssh.version(), "9.2.1");
        assert_eq!(ssh.config().repository, "local");
        assert_eq!(ssh.config().location, repo.join("ssh"));
        assert!(!ssh.is_installed());
        assert!(catalog.contains("local_mqtt"));
    }
}
