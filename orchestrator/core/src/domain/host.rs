// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Host Capabilities
//!
//! Facts about the machine the Supervisor runs on. Evaluations, job conditions
//! and option validation query these through [`HostProbe`]; the concrete probe
//! lives in `crate::infrastructure::host`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A hardware device node, as exposed to `device(...)` options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub path: PathBuf,
    pub subsystem: String,
}

#[async_trait]
pub trait HostProbe: Send + Sync {
    /// Free bytes on the filesystem holding `path`.
    async fn free_space(&self, path: &Path) -> std::io::Result<u64>;

    /// `PRETTY_NAME` of the host operating system.
    async fn operating_system(&self) -> Option<String>;

    /// Container virtualization the Supervisor runs under ("lxc", "docker", ...).
    async fn virtualization(&self) -> Option<String>;

    /// True when the Supervisor runs with a full capability set.
    async fn is_privileged(&self) -> bool;

    async fn apparmor_enabled(&self) -> bool;

    async fn internet_connectivity(&self) -> bool;

    async fn devices(&self) -> Vec<Device>;
}
