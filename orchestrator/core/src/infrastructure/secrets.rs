// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Secrets Store
//!
//! Home Assistant's `secrets.yaml`, used to resolve `!secret <name>` option
//! values. The file is re-read before every options write so edits take
//! effect on the next add-on start.

use crate::domain::addon::options::SecretResolver;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct SecretsStore {
    path: PathBuf,
    secrets: RwLock<HashMap<String, String>>,
}

impl SecretsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            secrets: RwLock::new(HashMap::new()),
        }
    }

    /// Re-reads the secrets file. A missing file clears the secrets; an
    /// unreadable one keeps the previous values.
    pub async fn reload(&self) {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.secrets.write().clear();
                return;
            }
            Err(e) => {
                warn!("Can't read secrets file {:?}: {}", self.path, e);
                return;
            }
        };

        let parsed: HashMap<String, serde_yaml::Value> =
            match serde_yaml::from_str::<Option<HashMap<String, serde_yaml::Value>>>(&content) {
                Ok(map) => map.unwrap_or_default(),
                Err(e) => {
                    warn!("Can't parse secrets file {:?}: {}", self.path, e);
                    return;
                }
            };

        let secrets: HashMap<String, String> = parsed
            .into_iter()
            .filter_map(|(name, value)| {
                let value = match value {
                    serde_yaml::Value::String(s) => s,
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((name, value))
            })
            .collect();

        debug!("Loaded {} secrets from {:?}", secrets.len(), self.path);
        *self.secrets.write() = secrets;
    }
}

impl SecretResolver for SecretsStore {
    fn secret(&self, name: &str) -> Option<String> {
        self.secrets.read().get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reload_reads_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secrets.yaml");
        std::fs::write(&path, "db_password: hunter2\nport: 5432\nnested:\n  a: b\n").unwrap();

        let store = SecretsStore::new(&path);
        store.reload().await;
        assert_eq!(store.secret("db_password").as_deref(), Some("hunter2"));
        assert_eq!(store.secret("port").as_deref(), Some("5432"));
        assert_eq!(store.secret("nested"), None);

        std::fs::remove_file(&path).unwrap();
        store.reload().await;
        assert_eq!(store.secret("db_password"), None);
    }
}
