// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Capture Configuration Types
//
// Defines the configuration manifest for oswatcher capture runs:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - libvirt connection and copy-on-write cloning
// - Graph store connection and the operator wipe flag
// - Run guard (replace/append) and settle delay
// - Per-collector options, each sliced into an immutable struct

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::collector::FailurePolicy;
use crate::domain::run_guard::GuardPolicy;

pub const API_VERSION: &str = "oswatcher/v1";
pub const KIND: &str = "CaptureConfig";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level Kubernetes-style capture configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfigManifest {
    /// API version (must be "oswatcher/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CaptureConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: CaptureConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfigSpec {
    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub capture: CaptureSettings,

    #[serde(default)]
    pub collectors: CollectorsConfig,

    #[serde(default)]
    pub import: ImportConfig,
}

/// Hypervisor connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// libvirt URI
    #[serde(default = "default_libvirt_uri")]
    pub uri: String,

    #[serde(default = "default_virsh_path")]
    pub virsh_path: PathBuf,

    #[serde(default = "default_qemu_img_path")]
    pub qemu_img_path: PathBuf,

    /// Boot a copy-on-write clone instead of the source domain
    #[serde(default = "default_true")]
    pub clone: bool,

    /// Parent directory for per-run overlay storage (system temp dir if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    #[default]
    Neo4j,
    /// Process-local store, discarded on exit
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub backend: GraphBackend,

    #[serde(default = "default_graph_uri")]
    pub uri: String,

    #[serde(default = "default_graph_user")]
    pub user: String,

    /// Prefer OSWATCHER_GRAPH_PASSWORD over storing this in the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Wipe the entire store before capturing
    #[serde(default)]
    pub delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Domain to capture (overridden by the CLI argument)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm_name: Option<String>,

    /// Blind wait between power-on and desktop_ready
    #[serde(default = "default_desktop_ready_delay", with = "humantime_serde")]
    pub desktop_ready_delay: Duration,

    #[serde(flatten)]
    pub guard: GuardPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorsConfig {
    #[serde(default)]
    pub hardening: HardeningConfig,

    #[serde(default)]
    pub introspection: IntrospectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardeningConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_checksec_path")]
    pub checksec_path: PathBuf,

    /// Kernel config check is skipped when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_checker_path: Option<PathBuf>,

    /// Guest path of the kernel config; the first captured boot/config-* otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel_config_path: Option<String>,

    /// Per-invocation scanner timeout
    #[serde(default = "default_scan_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default)]
    pub on_failure: FailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntrospectionConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Program and arguments; `{domain}` and `{run_id}` are substituted
    #[serde(default)]
    pub command: Vec<String>,

    #[serde(default = "default_extract_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default)]
    pub on_failure: FailurePolicy,
}

/// Disk image import into a libvirt storage pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default = "default_pool_name")]
    pub pool_name: String,

    /// Pool directory (data dir if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_path: Option<PathBuf>,

    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,

    #[serde(default = "default_vcpus")]
    pub vcpus: u32,
}

fn default_true() -> bool {
    true
}

fn default_libvirt_uri() -> String {
    "qemu:///session".to_string()
}

fn default_virsh_path() -> PathBuf {
    PathBuf::from("virsh")
}

fn default_qemu_img_path() -> PathBuf {
    PathBuf::from("qemu-img")
}

fn default_graph_uri() -> String {
    "127.0.0.1:7687".to_string()
}

fn default_graph_user() -> String {
    "neo4j".to_string()
}

fn default_desktop_ready_delay() -> Duration {
    Duration::from_secs(180)
}

fn default_checksec_path() -> PathBuf {
    PathBuf::from("checksec")
}

fn default_scan_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_extract_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_pool_name() -> String {
    "oswatcher".to_string()
}

fn default_memory_mib() -> u32 {
    2048
}

fn default_vcpus() -> u32 {
    2
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: default_libvirt_uri(),
            virsh_path: default_virsh_path(),
            qemu_img_path: default_qemu_img_path(),
            clone: true,
            storage_dir: None,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::default(),
            uri: default_graph_uri(),
            user: default_graph_user(),
            password: None,
            delete: false,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            vm_name: None,
            desktop_ready_delay: default_desktop_ready_delay(),
            guard: GuardPolicy::default(),
        }
    }
}

impl Default for HardeningConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            checksec_path: default_checksec_path(),
            kernel_checker_path: None,
            kernel_config_path: None,
            timeout: default_scan_timeout(),
            on_failure: FailurePolicy::default(),
        }
    }
}

impl Default for IntrospectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            command: Vec::new(),
            timeout: default_extract_timeout(),
            on_failure: FailurePolicy::default(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            pool_name: default_pool_name(),
            pool_path: None,
            memory_mib: default_memory_mib(),
            vcpus: default_vcpus(),
        }
    }
}

impl ImportConfig {
    pub fn resolved_pool_path(&self) -> PathBuf {
        self.pool_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("oswatcher")
                .join("images")
        })
    }
}

impl Default for CaptureConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "default".to_string(),
                labels: None,
            },
            spec: CaptureConfigSpec::default(),
        }
    }
}

impl CaptureConfigManifest {
    /// Load configuration from a YAML (or JSON) file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        std::fs::write(path, self.to_yaml_string()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Discover configuration file using precedence order
    /// 1. OSWATCHER_CONFIG_PATH environment variable
    /// 2. ./oswatcher-config.yaml (working directory)
    /// 3. ~/.oswatcher/config.yaml (user home)
    /// 4. /etc/oswatcher/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("OSWATCHER_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./oswatcher-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".oswatcher").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/oswatcher/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to defaults
    pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)?;
            config.apply_env_overrides();
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(path) => {
                tracing::info!("Loading configuration from discovered path: {:?}", path);
                Self::from_yaml_file(path)?
            }
            None => {
                tracing::warn!("No configuration file found in standard locations. Using defaults.");
                Self::default()
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup("OSWATCHER_GRAPH_PASSWORD") {
            tracing::info!("Environment override: OSWATCHER_GRAPH_PASSWORD");
            self.spec.graph.password = Some(password);
        }

        if let Some(val) = lookup("OSWATCHER_DESKTOP_READY_DELAY") {
            match humantime::parse_duration(&val) {
                Ok(delay) => {
                    tracing::info!("Environment override: OSWATCHER_DESKTOP_READY_DELAY={}", val);
                    self.spec.capture.desktop_ready_delay = delay;
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid value for OSWATCHER_DESKTOP_READY_DELAY: '{}' ({}). Ignoring.",
                        val,
                        e
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.api_version != API_VERSION {
            return invalid(format!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version, API_VERSION
            ));
        }
        if self.kind != KIND {
            return invalid(format!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND));
        }
        if self.metadata.name.is_empty() {
            return invalid("metadata.name cannot be empty".to_string());
        }
        if self.spec.connection.uri.is_empty() {
            return invalid("spec.connection.uri cannot be empty".to_string());
        }
        if self.spec.graph.backend == GraphBackend::Neo4j && self.spec.graph.uri.is_empty() {
            return invalid("spec.graph.uri cannot be empty for the neo4j backend".to_string());
        }
        if let Err(e) = self.spec.capture.guard.validate() {
            return invalid(format!("spec.capture: {}", e));
        }
        if let Some(name) = &self.spec.capture.vm_name {
            if name.trim().is_empty() {
                return invalid("spec.capture.vm_name cannot be blank".to_string());
            }
        }

        let hardening = &self.spec.collectors.hardening;
        if hardening.enabled && hardening.checksec_path.as_os_str().is_empty() {
            return invalid("spec.collectors.hardening.checksec_path cannot be empty".to_string());
        }

        let introspection = &self.spec.collectors.introspection;
        if introspection.enabled && introspection.command.is_empty() {
            return invalid(
                "spec.collectors.introspection.command is required when introspection is enabled"
                    .to_string(),
            );
        }

        if self.spec.import.pool_name.is_empty() {
            return invalid("spec.import.pool_name cannot be empty".to_string());
        }

        Ok(())
    }
}
