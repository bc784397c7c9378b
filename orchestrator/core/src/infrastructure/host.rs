// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! `HostProbe` implementations.
//!
//! [`LocalHostProbe`] reads the facts from the running Linux host
//! (`statvfs`, `/etc/os-release`, `/proc`, `/sys`). [`StaticHostProbe`] returns
//! fixed values and is used by tests and the memory backend.

use crate::domain::host::{Device, HostProbe};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const CONNECTIVITY_URL: &str = "https://checkonline.home-assistant.io/online.txt";
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LocalHostProbe {
    http: reqwest::Client,
    sysfs: PathBuf,
    devfs: PathBuf,
}

impl Default for LocalHostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHostProbe {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(CONNECTIVITY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            sysfs: PathBuf::from("/sys/class"),
            devfs: PathBuf::from("/dev"),
        }
    }

    fn statvfs(path: &Path) -> std::io::Result<u64> {
        let c_path = CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        // SAFETY: c_path is a valid NUL-terminated string and stat is a valid out pointer.
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }
}

fn parse_os_release(content: &str) -> Option<String> {
    content
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim_matches('"').to_string())
}

/// True when every capability bit up to the highest one the kernel knows is set.
fn full_capabilities(status: &str, last_cap: u32) -> bool {
    let Some(cap_eff) = status.lines().find_map(|line| line.strip_prefix("CapEff:")) else {
        return false;
    };
    let Ok(effective) = u64::from_str_radix(cap_eff.trim(), 16) else {
        return false;
    };
    let expected = if last_cap >= 63 {
        u64::MAX
    } else {
        (1u64 << (last_cap + 1)) - 1
    };
    effective & expected == expected
}

#[async_trait]
impl HostProbe for LocalHostProbe {
    async fn free_space(&self, path: &Path) -> std::io::Result<u64> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || Self::statvfs(&path))
            .await
            .map_err(std::io::Error::other)?
    }

    async fn operating_system(&self) -> Option<String> {
        let content = tokio::fs::read_to_string("/etc/os-release").await.ok()?;
        parse_os_release(&content)
    }

    async fn virtualization(&self) -> Option<String> {
        if let Ok(environ) = tokio::fs::read("/proc/1/environ").await {
            let container = environ
                .split(|b| *b == 0)
                .filter_map(|entry| std::str::from_utf8(entry).ok())
                .find_map(|entry| entry.strip_prefix("container="))
                .map(str::to_string);
            if container.is_some() {
                return container;
            }
        }
        if Path::new("/.dockerenv").exists() {
            return Some("docker".to_string());
        }
        if Path::new("/run/.containerenv").exists() {
            return Some("podman".to_string());
        }
        None
    }

    async fn is_privileged(&self) -> bool {
        let Ok(status) = tokio::fs::read_to_string("/proc/self/status").await else {
            return false;
        };
        let last_cap = tokio::fs::read_to_string("/proc/sys/kernel/cap_last_cap")
            .await
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(40);
        full_capabilities(&status, last_cap)
    }

    async fn apparmor_enabled(&self) -> bool {
        tokio::fs::read_to_string("/sys/module/apparmor/parameters/enabled")
            .await
            .map(|value| value.trim() == "Y")
            .unwrap_or(false)
    }

    async fn internet_connectivity(&self) -> bool {
        match self.http.get(CONNECTIVITY_URL).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Connectivity check failed: {}", e);
                false
            }
        }
    }

    async fn devices(&self) -> Vec<Device> {
        let sysfs = self.sysfs.clone();
        let devfs = self.devfs.clone();
        tokio::task::spawn_blocking(move || {
            let mut devices = Vec::new();
            let Ok(subsystems) = std::fs::read_dir(&sysfs) else {
                return devices;
            };
            for subsystem in subsystems.flatten() {
                let subsystem_name = subsystem.file_name().to_string_lossy().to_string();
                let Ok(entries) = std::fs::read_dir(subsystem.path()) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let node = devfs.join(entry.file_name());
                    if node.exists() {
                        devices.push(Device {
                            path: node,
                            subsystem: subsystem_name.clone(),
                        });
                    }
                }
            }
            devices
        })
        .await
        .unwrap_or_default()
    }
}

/// Fixed host facts.
pub struct StaticHostProbe {
    pub free_space: RwLock<u64>,
    pub operating_system: RwLock<Option<String>>,
    pub virtualization: RwLock<Option<String>>,
    pub privileged: RwLock<bool>,
    pub apparmor: RwLock<bool>,
    pub online: RwLock<bool>,
    pub devices: RwLock<Vec<Device>>,
}

impl Default for StaticHostProbe {
    fn default() -> Self {
        Self {
            free_space: RwLock::new(100 * 1024 * 1024 * 1024),
            operating_system: RwLock::new(Some("Debian GNU/Linux 12 (bookworm)".to_string())),
            virtualization: RwLock::new(None),
            privileged: RwLock::new(true),
            apparmor: RwLock::new(true),
            online: RwLock::new(true),
            devices: RwLock::new(Vec::new()),
        }
    }
}

impl StaticHostProbe {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostProbe for StaticHostProbe {
    async fn free_space(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(*self.free_space.read())
    }

    async fn operating_system(&self) -> Option<String> {
        self.operating_system.read().clone()
    }

    async fn virtualization(&self) -> Option<String> {
        self.virtualization.read().clone()
    }

    async fn is_privileged(&self) -> bool {
        *self.privileged.read()
    }

    async fn apparmor_enabled(&self) -> bool {
        *self.apparmor.read()
    }

    async fn internet_connectivity(&self) -> bool {
        *self.online.read()
    }

    async fn devices(&self) -> Vec<Device> {
        self.devices.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_release() {
        let content = "NAME=\"Debian GNU/Linux\"\nPRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\n";
        assert_eq!(parse_os_release(content).as_deref(), Some("Debian GNU/Linux 12 (bookworm)"));
        assert_eq!(parse_os_release("ID=alpine\n"), None);
    }

    #[test]
    fn test_full_capabilities() {
        let full = "Name:\tsupervisor\nCapEff:\t000001ffffffffff\n";
        let reduced = "Name:\tsupervisor\nCapEff:\t00000000a80425fb\n";
        assert!(full_capabilities(full, 40));
        assert!(!full_capabilities(reduced, 40));
        assert!(!full_capabilities("Name:\tx\n", 40));
    }

    #[tokio::test]
    async fn test_free_space_of_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let probe = LocalHostProbe::new();
        assert!(probe.free_space(dir.path()).await.unwrap() > 0);
    }
}
