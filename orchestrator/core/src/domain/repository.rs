// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Installed Add-on Repository
//!
//! Persistence contract for installed add-ons. Every installed add-on owns two
//! records keyed by slug:
//!
//! | Record | Contents | Owner |
//! |--------|----------|-------|
//! | `system` | [`AddonConfig`] manifest captured at install time | store / install |
//! | `user` | [`AddonPersist`] user settings | the installed add-on |
//!
//! Callers never hold references into the stored data. They read a snapshot
//! with [`AddonsRepository::get`] and commit changes with `upsert`, `remove`
//! or `transaction`, each of which is flushed before it returns.
//!
//! Implemented in `crate::infrastructure::addons_data` by a JSON file store
//! (`addons.json`) and an in-memory store for tests.

use crate::domain::addon::{AddonConfig, AddonPersist};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// On-disk shape of `addons.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AddonsDataFile {
    #[serde(default)]
    pub user: BTreeMap<String, AddonPersist>,
    #[serde(default)]
    pub system: BTreeMap<String, AddonConfig>,
}

/// Both records of one installed add-on.
#[derive(Debug, Clone, PartialEq)]
pub struct InstalledRecord {
    pub system: AddonConfig,
    pub user: AddonPersist,
}

pub type TransactionFn<'a> = dyn FnMut(&mut AddonsDataFile) -> Result<(), StoreError> + Send + 'a;

pub trait AddonsRepository: Send + Sync {
    /// Slugs of all installed add-ons.
    fn installed(&self) -> Vec<String>;

    fn get(&self, slug: &str) -> Option<InstalledRecord>;

    /// Inserts or replaces both records of an add-on.
    fn upsert(&self, slug: &str, record: InstalledRecord) -> Result<(), StoreError>;

    /// Removes both records. Returns false if the add-on was not stored.
    fn remove(&self, slug: &str) -> Result<bool, StoreError>;

    /// Applies `f` to a working copy and commits it only if `f` succeeds and
    /// the copy is persisted.
    fn transaction(&self, f: &mut TransactionFn<'_>) -> Result<(), StoreError>;

    fn contains(&self, slug: &str) -> bool {
        self.get(slug).is_some()
    }

    /// Replaces the user record of an installed add-on.
    fn update_user(&self, slug: &str, user: AddonPersist) -> Result<(), StoreError> {
        let mut user = Some(user);
        self.transaction(&mut |data| {
            let entry = data
                .user
                .get_mut(slug)
                .ok_or_else(|| StoreError::NotFound(slug.to_string()))?;
            if let Some(user) = user.take() {
                *entry = user;
            }
            Ok(())
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.to_string())
    }
}
