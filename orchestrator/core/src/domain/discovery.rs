// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Pending service discovery messages announced by add-ons.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    pub uuid: Uuid,
    pub addon: String,
    pub service: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Default)]
pub struct DiscoveryRegistry {
    messages: RwLock<Vec<DiscoveryMessage>>,
}

impl DiscoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a message. An identical `(addon, service, config)` message is
    /// kept instead of duplicated.
    pub fn send(&self, addon: &str, service: &str, config: serde_json::Value) -> DiscoveryMessage {
        let mut messages = self.messages.write();
        if let Some(existing) = messages
            .iter()
            .find(|m| m.addon == addon && m.service == service && m.config == config)
        {
            return existing.clone();
        }
        let message = DiscoveryMessage {
            uuid: Uuid::new_v4(),
            addon: addon.to_string(),
            service: service.to_string(),
            config,
        };
        messages.push(message.clone());
        message
    }

    pub fn list(&self) -> Vec<DiscoveryMessage> {
        self.messages.read().clone()
    }

    pub fn for_addon(&self, slug: &str) -> Vec<DiscoveryMessage> {
        self.messages.read().iter().filter(|m| m.addon == slug).cloned().collect()
    }

    pub fn remove(&self, uuid: Uuid) -> bool {
        let mut messages = self.messages.write();
        let before = messages.len();
        messages.retain(|m| m.uuid != uuid);
        messages.len() != before
    }

    /// Drops every message announced by `slug`. Returns how many were removed.
    pub fn remove_addon(&self, slug: &str) -> usize {
        let mut messages = self.messages.write();
        let before = messages.len();
        messages.retain(|m| m.addon != slug);
        before - messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_send_deduplicates_and_remove_addon() {
        let registry = DiscoveryRegistry::new();
        let first = registry.send("local_mqtt", "mqtt", json!({"port": 1883}));
        let again = registry.send("local_mqtt", "mqtt", json!({"port": 1883}));
        registry.send("local_ssh", "ssh", json!({}));
        assert_eq!(first.uuid, again.uuid);
        assert_eq!(registry.list().len(), 2);

        assert_eq!(registry.remove_addon("local_mqtt"), 1);
        assert!(registry.for_addon("local_mqtt").is_empty());
        assert_eq!(registry.for_addon("local_ssh").len(), 1);
    }
}
