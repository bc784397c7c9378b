// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::dns::{DnsHosts, HostEntry};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::debug;

/// Hosts file served by the internal DNS plugin. Entries are staged in
/// memory and written in one go by [`DnsHosts::flush`].
pub struct HostsFile {
    path: PathBuf,
    entries: RwLock<Vec<HostEntry>>,
}

impl HostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn render(&self) -> String {
        self.entries
            .read()
            .iter()
            .map(|entry| format!("{} {}\n", entry.ip, entry.names.join(" ")))
            .collect()
    }
}

#[async_trait]
impl DnsHosts for HostsFile {
    fn add_host(&self, ip: IpAddr, names: Vec<String>) {
        let mut entries = self.entries.write();
        // A name resolves to a single address
        entries.iter_mut().for_each(|e| e.names.retain(|n| !names.contains(n)));
        entries.retain(|e| !e.names.is_empty());

        match entries.iter_mut().find(|e| e.ip == ip) {
            Some(entry) => entry.names.extend(names),
            None => entries.push(HostEntry { ip, names }),
        }
    }

    fn remove_host(&self, name: &str) {
        let mut entries = self.entries.write();
        entries.iter_mut().for_each(|e| e.names.retain(|n| n != name));
        entries.retain(|e| !e.names.is_empty());
    }

    fn entries(&self) -> Vec<HostEntry> {
        self.entries.read().clone()
    }

    async fn flush(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = self.render();
        tokio::fs::write(&self.path, content).await?;
        debug!("Wrote {} host entries to {:?}", self.entries.read().len(), self.path);
        Ok(())
    }
}
