// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Add-on Domain
//!
//! Value types shared by store (catalog) add-ons and installed add-ons.
//!
//! | Type | Role |
//! |------|------|
//! | [`AddonConfig`] | Immutable manifest ("system" data) |
//! | [`AddonPersist`] | User settings of an installed add-on ("user" data) |
//! | [`AddonDescriptor`] | Read-only capability interface over both variants |
//! | [`CatalogAddon`] | An add-on available from a repository, not installed |
//! | [`AddonState`] | Runtime state machine of an installed add-on |

pub mod config;
pub mod error;
pub mod options;

pub use config::{AddonConfig, AddonPersist};
pub use error::{AddonError, AddonErrorKind};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonState {
    Unknown,
    Startup,
    Started,
    Stopping,
    Stopped,
    Error,
    Rebuild,
}

impl fmt::Display for AddonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Startup => "startup",
            Self::Started => "started",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Rebuild => "rebuild",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonBoot {
    #[default]
    Auto,
    Manual,
}

/// Boot stage in which an add-on is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonStartup {
    Initialize,
    System,
    Services,
    #[default]
    Application,
    Once,
}

impl AddonStartup {
    /// Stages run during boot, in order.
    pub const BOOT_ORDER: [AddonStartup; 4] = [
        AddonStartup::Initialize,
        AddonStartup::System,
        AddonStartup::Services,
        AddonStartup::Application,
    ];
}

impl fmt::Display for AddonStartup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialize => "initialize",
            Self::System => "system",
            Self::Services => "services",
            Self::Application => "application",
            Self::Once => "once",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddonStage {
    #[default]
    Stable,
    Experimental,
    Deprecated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    #[default]
    Hot,
    Cold,
}

/// Read-only view shared by installed and catalog add-ons.
pub trait AddonDescriptor: Send + Sync {
    fn slug(&self) -> &str;

    /// Manifest currently describing the add-on.
    fn config(&self) -> Arc<AddonConfig>;

    /// Version in effect: installed version for installed add-ons, published
    /// version for catalog add-ons.
    fn version(&self) -> String;

    fn is_installed(&self) -> bool;

    fn name(&self) -> String {
        self.config().name.clone()
    }

    fn latest_version(&self) -> String {
        self.config().version.clone()
    }

    fn is_available(&self, arch: &str, machine: Option<&str>) -> bool {
        let config = self.config();
        config.supports_arch(arch) && config.supports_machine(machine)
    }
}

/// Add-on offered by a repository but not installed.
#[derive(Debug, Clone)]
pub struct CatalogAddon {
    config: Arc<AddonConfig>,
}

impl CatalogAddon {
    pub fn new(config: AddonConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl AddonDescriptor for CatalogAddon {
    fn slug(&self) -> &str {
        &self.config.slug
    }

    fn config(&self) -> Arc<AddonConfig> {
        self.config.clone()
    }

    fn version(&self) -> String {
        self.config.version.clone()
    }

    fn is_installed(&self) -> bool {
        false
    }
}
