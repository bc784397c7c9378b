// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Supervisor Configuration Types
//
// Defines the configuration schema for the Supervisor daemon:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Data paths (addons.json, jobs.json, add-on data, backups, secrets)
// - Docker engine connection
// - Add-on boot behaviour and store repositories
// - Resolution thresholds and scheduling
// - Logging and metrics settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "supervisor/v1";
pub const KIND: &str = "SupervisorConfig";

/// Top-level Kubernetes-style Supervisor configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfigManifest {
    /// API version (must be "supervisor/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "SupervisorConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: SupervisorConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupervisorConfigSpec {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub docker: DockerConfig,

    #[serde(default)]
    pub addons: AddonsConfig,

    #[serde(default)]
    pub resolution: ResolutionConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of all Supervisor state
    #[serde(default = "default_data_dir")]
    pub data: PathBuf,

    /// Installed add-on store, relative to `data` unless absolute
    #[serde(default = "default_addons_file")]
    pub addons_file: PathBuf,

    #[serde(default = "default_jobs_file")]
    pub jobs_file: PathBuf,

    /// Per add-on data directories (`<addon_data>/<slug>`)
    #[serde(default = "default_addon_data")]
    pub addon_data: PathBuf,

    /// Per add-on public configuration directories
    #[serde(default = "default_addon_configs")]
    pub addon_configs: PathBuf,

    #[serde(default = "default_backup_dir")]
    pub backup: PathBuf,

    #[serde(default = "default_secrets_file")]
    pub secrets_file: PathBuf,

    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,
}

impl PathsConfig {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data.join(path)
        }
    }

    pub fn addons_file(&self) -> PathBuf {
        self.resolve(&self.addons_file)
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.resolve(&self.jobs_file)
    }

    pub fn addon_data(&self) -> PathBuf {
        self.resolve(&self.addon_data)
    }

    pub fn addon_configs(&self) -> PathBuf {
        self.resolve(&self.addon_configs)
    }

    pub fn backup(&self) -> PathBuf {
        self.resolve(&self.backup)
    }

    pub fn secrets_file(&self) -> PathBuf {
        self.resolve(&self.secrets_file)
    }

    pub fn hosts_file(&self) -> PathBuf {
        self.resolve(&self.hosts_file)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data: default_data_dir(),
            addons_file: default_addons_file(),
            jobs_file: default_jobs_file(),
            addon_data: default_addon_data(),
            addon_configs: default_addon_configs(),
            backup: default_backup_dir(),
            secrets_file: default_secrets_file(),
            hosts_file: default_hosts_file(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Path to Docker socket
    /// Default: bollard's local defaults (`/var/run/docker.sock` on Unix)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_path: Option<String>,
}

/// Which container engine backs the add-ons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeBackend {
    #[default]
    Docker,
    /// No engine; containers are simulated in memory
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddonsConfig {
    /// Seconds to let add-ons settle after a boot stage before awaiting them
    #[serde(default = "default_wait_boot")]
    pub wait_boot: u64,

    /// Local directories holding add-on repositories
    #[serde(default)]
    pub repositories: Vec<PathBuf>,

    /// CPU architecture used to pick add-on images
    #[serde(default = "default_arch")]
    pub arch: String,

    /// Machine type used for machine filters
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,

    #[serde(default)]
    pub runtime: RuntimeBackend,
}

impl Default for AddonsConfig {
    fn default() -> Self {
        Self {
            wait_boot: default_wait_boot(),
            repositories: Vec::new(),
            arch: default_arch(),
            machine: None,
            runtime: RuntimeBackend::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionConfig {
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_seconds: u64,

    #[serde(default = "default_check_interval")]
    pub check_interval_seconds: u64,

    #[serde(default = "default_autofix_interval")]
    pub autofix_interval_seconds: u64,

    #[serde(default = "default_min_docker_version")]
    pub min_docker_version: String,

    /// Operating systems considered supported (`PRETTY_NAME` prefixes)
    #[serde(default = "default_supported_os")]
    pub supported_os: Vec<String>,

    /// Image name fragments that must not run next to the Supervisor
    #[serde(default = "default_denied_images")]
    pub denied_images: Vec<String>,

    #[serde(default = "default_min_free_space_gb")]
    pub min_free_space_gb: f64,

    /// Require Docker content trust
    #[serde(default = "default_true")]
    pub content_trust: bool,
}

impl ResolutionConfig {
    pub fn min_free_space_bytes(&self) -> u64 {
        (self.min_free_space_gb * 1024.0 * 1024.0 * 1024.0) as u64
    }
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            evaluation_interval_seconds: default_evaluation_interval(),
            check_interval_seconds: default_check_interval(),
            autofix_interval_seconds: default_autofix_interval(),
            min_docker_version: default_min_docker_version(),
            supported_os: default_supported_os(),
            denied_images: default_denied_images(),
            min_free_space_gb: default_min_free_space_gb(),
            content_trust: default_true(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_addons_file() -> PathBuf {
    PathBuf::from("addons.json")
}

fn default_jobs_file() -> PathBuf {
    PathBuf::from("jobs.json")
}

fn default_addon_data() -> PathBuf {
    PathBuf::from("addons/data")
}

fn default_addon_configs() -> PathBuf {
    PathBuf::from("addon_configs")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("backup")
}

fn default_secrets_file() -> PathBuf {
    PathBuf::from("homeassistant/secrets.yaml")
}

fn default_hosts_file() -> PathBuf {
    PathBuf::from("dns/hosts")
}

fn default_wait_boot() -> u64 {
    5
}

fn default_arch() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "aarch64",
        "arm" => "armv7",
        "x86" => "i386",
        other => other,
    }
    .to_string()
}

fn default_evaluation_interval() -> u64 {
    3600
}

fn default_check_interval() -> u64 {
    1800
}

fn default_autofix_interval() -> u64 {
    3600
}

fn default_min_docker_version() -> String {
    "20.10.17".to_string()
}

fn default_supported_os() -> Vec<String> {
    vec!["Debian GNU/Linux 11".to_string(), "Debian GNU/Linux 12".to_string()]
}

fn default_denied_images() -> Vec<String> {
    vec![
        "containrrr/watchtower".to_string(),
        "pyouroboros/ouroboros".to_string(),
        "v2tec/watchtower".to_string(),
    ]
}

fn default_min_free_space_gb() -> f64 {
    2.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for SupervisorConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "supervisor".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: SupervisorConfigSpec::default(),
        }
    }
}

impl SupervisorConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. SUPERVISOR_CONFIG_PATH environment variable
    /// 2. ./supervisor.yaml (working directory)
    /// 3. ~/.supervisor/config.yaml (user home)
    /// 4. /etc/supervisor/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("SUPERVISOR_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./supervisor.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".supervisor").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/supervisor/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("SUPERVISOR_WAIT_BOOT") {
            match val.parse::<u64>() {
                Ok(seconds) => {
                    tracing::info!("Environment override: SUPERVISOR_WAIT_BOOT={}", seconds);
                    self.spec.addons.wait_boot = seconds;
                }
                Err(_) => {
                    tracing::warn!(
                        "Invalid value for SUPERVISOR_WAIT_BOOT: '{}'. Expected seconds. Ignoring.",
                        val
                    );
                }
            }
        }

        if let Ok(val) = std::env::var("SUPERVISOR_DOCKER_SOCKET") {
            if !val.is_empty() {
                tracing::info!("Environment override: SUPERVISOR_DOCKER_SOCKET={}", val);
                self.spec.docker.socket_path = Some(val);
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.addons.arch.is_empty() {
            anyhow::bail!("spec.addons.arch cannot be empty");
        }

        if semver::Version::parse(&self.spec.resolution.min_docker_version).is_err() {
            anyhow::bail!(
                "spec.resolution.min_docker_version is not a version: '{}'",
                self.spec.resolution.min_docker_version
            );
        }

        if self.spec.resolution.min_free_space_gb < 0.0 {
            anyhow::bail!("spec.resolution.min_free_space_gb cannot be negative");
        }

        let resolution = &self.spec.resolution;
        for (name, value) in [
            ("evaluation_interval_seconds", resolution.evaluation_interval_seconds),
            ("check_interval_seconds", resolution.check_interval_seconds),
            ("autofix_interval_seconds", resolution.autofix_interval_seconds),
        ] {
            if value == 0 {
                anyhow::bail!("spec.resolution.{} must be greater than zero", name);
            }
        }

        if !matches!(self.spec.observability.logging.format.as_str(), "text" | "json") {
            anyhow::bail!(
                "spec.observability.logging.format must be 'text' or 'json', got '{}'",
                self.spec.observability.logging.format
            );
        }

        Ok(())
    }
}
