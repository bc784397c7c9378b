// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Typed add-on manifest (the "system" data) and the user-controlled
//! persisted settings (the "user" data).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use super::{AddonBoot, AddonStage, AddonStartup, BackupMode};

/// Add-on manifest as published by a repository. Constructed once when the
/// store is loaded or an add-on is installed and treated as immutable after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonConfig {
    pub name: String,
    pub slug: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    /// Published image. `None` means the add-on is built locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub arch: Vec<String>,
    #[serde(default)]
    pub machine: Vec<String>,
    #[serde(default)]
    pub startup: AddonStartup,
    #[serde(default)]
    pub boot: AddonBoot,
    #[serde(default)]
    pub stage: AddonStage,
    #[serde(default = "empty_object")]
    pub options: serde_json::Value,
    /// Options schema. `false` disables validation entirely.
    #[serde(default = "empty_object")]
    pub schema: serde_json::Value,
    #[serde(default)]
    pub ports: HashMap<String, Option<u16>>,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default)]
    pub privileged: Vec<String>,
    #[serde(default)]
    pub full_access: bool,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default = "default_true")]
    pub apparmor: bool,
    #[serde(default)]
    pub ingress: bool,
    #[serde(default)]
    pub ingress_port: Option<u16>,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub stdin: bool,
    #[serde(default = "default_true")]
    pub init: bool,
    #[serde(default)]
    pub homeassistant_api: bool,
    #[serde(default)]
    pub hassio_api: bool,
    #[serde(default)]
    pub map: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default)]
    pub discovery: Vec<String>,
    #[serde(default)]
    pub backup: BackupMode,
    #[serde(default)]
    pub backup_pre: Option<String>,
    #[serde(default)]
    pub backup_post: Option<String>,
    #[serde(default)]
    pub backup_exclude: Vec<String>,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub url: Option<String>,
    /// Repository slug the add-on came from.
    #[serde(default)]
    pub repository: String,
    /// Directory of the add-on inside its repository.
    #[serde(default)]
    pub location: PathBuf,
}

impl AddonConfig {
    pub fn is_local_build(&self) -> bool {
        self.image.is_none()
    }

    /// Image name, falling back to the local build tag.
    pub fn image_name(&self, arch: &str) -> String {
        match &self.image {
            Some(image) => image.replace("{arch}", arch),
            None => format!("local/{}-addon-{}", arch, self.slug),
        }
    }

    pub fn schema_enabled(&self) -> bool {
        !matches!(self.schema, serde_json::Value::Bool(false))
    }

    pub fn supports_arch(&self, arch: &str) -> bool {
        self.arch.is_empty() || self.arch.iter().any(|a| a == arch)
    }

    /// Machine filters support negation (`!raspberrypi3`).
    pub fn supports_machine(&self, machine: Option<&str>) -> bool {
        if self.machine.is_empty() {
            return true;
        }
        let Some(machine) = machine else {
            return false;
        };
        if self.machine.iter().any(|m| m.strip_prefix('!') == Some(machine)) {
            return false;
        }
        let allow: Vec<&String> = self.machine.iter().filter(|m| !m.starts_with('!')).collect();
        allow.is_empty() || allow.iter().any(|m| m.as_str() == machine)
    }
}

/// User-controlled settings of an installed add-on. Lives as long as the
/// add-on is installed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddonPersist {
    pub version: String,
    pub image: String,
    #[serde(default = "empty_object")]
    pub options: serde_json::Value,
    #[serde(default)]
    pub boot: AddonBoot,
    #[serde(default = "default_true")]
    pub protected: bool,
    #[serde(default)]
    pub auto_update: bool,
    #[serde(default)]
    pub watchdog: bool,
    #[serde(default)]
    pub ingress_panel: bool,
    #[serde(default)]
    pub audio_input: Option<String>,
    #[serde(default)]
    pub audio_output: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    pub uuid: String,
}

impl AddonPersist {
    /// Fresh user settings for an add-on being installed.
    pub fn for_install(config: &AddonConfig, arch: &str) -> Self {
        Self {
            version: config.version.clone(),
            image: config.image_name(arch),
            options: serde_json::Value::Object(Default::default()),
            boot: config.boot,
            protected: true,
            auto_update: false,
            watchdog: false,
            ingress_panel: false,
            audio_input: None,
            audio_output: None,
            access_token: None,
            uuid: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}
