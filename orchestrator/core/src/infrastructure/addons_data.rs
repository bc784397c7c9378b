// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `AddonsRepository` implementations: the `addons.json` file store used by
//! the daemon and an in-memory store for tests and the memory backend.

use crate::domain::repository::{AddonsDataFile, AddonsRepository, InstalledRecord, StoreError, TransactionFn};
use crate::infrastructure::json_file::{read_json_or_default, write_json_atomic};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use tracing::debug;

fn record(data: &AddonsDataFile, slug: &str) -> Option<InstalledRecord> {
    Some(InstalledRecord {
        system: data.system.get(slug)?.clone(),
        user: data.user.get(slug)?.clone(),
    })
}

/// Applies `f` to a copy of `data`, persists the copy with `persist`, then
/// swaps it in. `data` is untouched when either step fails.
fn commit(
    data: &RwLock<AddonsDataFile>,
    f: &mut TransactionFn<'_>,
    persist: impl FnOnce(&AddonsDataFile) -> Result<(), StoreError>,
) -> Result<(), StoreError> {
    let mut guard = data.write();
    let mut working = guard.clone();
    f(&mut working)?;
    persist(&working)?;
    *guard = working;
    Ok(())
}

/// File-backed store. Every mutation is flushed before it returns.
pub struct JsonAddonsRepository {
    path: PathBuf,
    data: RwLock<AddonsDataFile>,
}

impl JsonAddonsRepository {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data: AddonsDataFile = read_json_or_default(&path)?;
        debug!("Loaded {} installed add-ons from {:?}", data.system.len(), path);
        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AddonsRepository for JsonAddonsRepository {
    fn installed(&self) -> Vec<String> {
        let data = self.data.read();
        data.system.keys().filter(|slug| data.user.contains_key(*slug)).cloned().collect()
    }

    fn get(&self, slug: &str) -> Option<InstalledRecord> {
        record(&self.data.read(), slug)
    }

    fn upsert(&self, slug: &str, record: InstalledRecord) -> Result<(), StoreError> {
        let mut record = Some(record);
        self.transaction(&mut |data| {
            if let Some(record) = record.take() {
                data.system.insert(slug.to_string(), record.system);
                data.user.insert(slug.to_string(), record.user);
            }
            Ok(())
        })
    }

    fn remove(&self, slug: &str) -> Result<bool, StoreError> {
        let mut removed = false;
        self.transaction(&mut |data| {
            let system = data.system.remove(slug).is_some();
            let user = data.user.remove(slug).is_some();
            removed = system || user;
            Ok(())
        })?;
        Ok(removed)
    }

    fn transaction(&self, f: &mut TransactionFn<'_>) -> Result<(), StoreError> {
        commit(&self.data, f, |working| write_json_atomic(&self.path, working))
    }
}

#[derive(Default)]
pub struct InMemoryAddonsRepository {
    data: RwLock<AddonsDataFile>,
}

impl InMemoryAddonsRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> AddonsDataFile {
        self.data.read().clone()
    }
}

impl AddonsRepository for InMemoryAddonsRepository {
    fn installed(&self) -> Vec<String> {
        let data = self.data.read();
        data.system.keys().filter(|slug| data.user.contains_key(*slug)).cloned().collect()
    }

    fn get(&self, slug: &str) -> Option<InstalledRecord> {
        record(&self.data.read(), slug)
    }

    fn upsert(&self, slug: &str, record: InstalledRecord) -> Result<(), StoreError> {
        let mut data = self.data.write();
        data.system.insert(slug.to_string(), record.system);
        data.user.insert(slug.to_string(), record.user);
        Ok(())
    }

    fn remove(&self, slug: &str) -> Result<bool, StoreError> {
        let mut data = self.data.write();
        let system = data.system.remove(slug).is_some();
        let user = data.user.remove(slug).is_some();
        Ok(system || user)
    }

    fn transaction(&self, f: &mut TransactionFn<'_>) -> Result<(), StoreError> {
        commit(&self.data, f, |_| Ok(()))
    }
}
