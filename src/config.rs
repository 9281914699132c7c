//! Desired cluster configuration
//!
//! The manifest describes the control-plane hosts the orchestrator expects to
//! manage and the Kubernetes version they should run. It is loaded from YAML
//! and owned by the caller; an investigation only ever flips `is_leader`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Default SSH port for control-plane hosts
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default secure port of the Kubernetes API server
pub const DEFAULT_API_SERVER_PORT: u16 = 6443;

/// Default etcd client port
pub const DEFAULT_ETCD_PORT: u16 = 2379;

/// Operating system running on a host
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperatingSystem {
    Ubuntu,
    Debian,
    Centos,
    Rhel,
    Amzn,
    Flatcar,
    Coreos,
    #[default]
    #[serde(other)]
    Unknown,
}

/// How core components are installed on an operating system
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageFamily {
    /// Packages managed with rpm
    Rpm,
    /// Packages managed with dpkg
    Dpkg,
    /// Container-optimized image, the runtime ships with the OS
    Immutable,
    /// Not recognised, version detection is skipped
    Unknown,
}

impl OperatingSystem {
    pub fn family(self) -> PackageFamily {
        match self {
            OperatingSystem::Centos | OperatingSystem::Rhel | OperatingSystem::Amzn => {
                PackageFamily::Rpm
            }
            OperatingSystem::Ubuntu | OperatingSystem::Debian => PackageFamily::Dpkg,
            OperatingSystem::Flatcar | OperatingSystem::Coreos => PackageFamily::Immutable,
            OperatingSystem::Unknown => PackageFamily::Unknown,
        }
    }
}

/// A single control-plane host
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostConfig {
    /// Hostname, also the name of the Kubernetes node object
    pub hostname: String,

    /// Address used to reach the host over SSH
    #[serde(default)]
    pub public_address: String,

    /// Address the control-plane components listen on
    #[serde(default)]
    pub private_address: String,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default = "default_ssh_username")]
    pub ssh_username: String,

    #[serde(default)]
    pub ssh_private_key_file: Option<String>,

    #[serde(default)]
    pub operating_system: OperatingSystem,

    /// Set on the host elected as leader by the last investigation
    #[serde(default)]
    pub is_leader: bool,
}

impl HostConfig {
    /// Create a host with defaults for everything but its identity and OS
    pub fn new(hostname: impl Into<String>, operating_system: OperatingSystem) -> Self {
        Self {
            hostname: hostname.into(),
            public_address: String::new(),
            private_address: String::new(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_username: default_ssh_username(),
            ssh_private_key_file: None,
            operating_system,
            is_leader: false,
        }
    }

    /// Address to SSH into, falling back to the hostname
    pub fn ssh_address(&self) -> &str {
        first_non_empty(&[&self.public_address, &self.private_address, &self.hostname])
    }

    /// Address control-plane services listen on, falling back to the hostname
    pub fn service_address(&self) -> &str {
        first_non_empty(&[&self.private_address, &self.public_address, &self.hostname])
    }
}

fn first_non_empty<'a>(candidates: &[&'a String]) -> &'a str {
    candidates
        .iter()
        .find(|c| !c.is_empty())
        .map(|c| c.as_str())
        .unwrap_or_default()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_ssh_username() -> String {
    "root".to_string()
}

/// Versions of the cluster components
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionConfig {
    pub kubernetes: String,
}

/// Control-plane host list
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ControlPlaneConfig {
    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

/// How to reach the API server health endpoint
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerConfig {
    #[serde(default = "default_api_server_port")]
    pub port: u16,

    /// CA bundle used to verify the serving certificate
    #[serde(default)]
    pub ca_file: Option<String>,

    /// Skip TLS verification when no CA bundle is configured
    #[serde(default = "default_true")]
    pub insecure_skip_tls_verify: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_API_SERVER_PORT,
            ca_file: None,
            insecure_skip_tls_verify: true,
        }
    }
}

/// How to reach etcd over its JSON gateway
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EtcdConfig {
    #[serde(default = "default_etcd_port")]
    pub port: u16,

    #[serde(default)]
    pub ca_file: Option<String>,

    /// Client certificate and key (PEM) presented to etcd
    #[serde(default)]
    pub cert_file: Option<String>,

    #[serde(default)]
    pub key_file: Option<String>,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

impl Default for EtcdConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_ETCD_PORT,
            ca_file: None,
            cert_file: None,
            key_file: None,
            insecure_skip_tls_verify: false,
        }
    }
}

fn default_api_server_port() -> u16 {
    DEFAULT_API_SERVER_PORT
}

fn default_etcd_port() -> u16 {
    DEFAULT_ETCD_PORT
}

fn default_true() -> bool {
    true
}

/// Desired state of a cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub name: String,

    pub versions: VersionConfig,

    #[serde(default)]
    pub control_plane: ControlPlaneConfig,

    #[serde(default)]
    pub api_server: ApiServerConfig,

    #[serde(default)]
    pub etcd: EtcdConfig,
}

impl ClusterConfig {
    /// Load and validate a manifest from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading cluster manifest from {}", path.display());

        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a manifest
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: ClusterConfig = serde_yaml::from_str(raw)
            .map_err(|e| Error::ConfigError(format!("invalid cluster manifest: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the investigation relies on
    pub fn validate(&self) -> Result<()> {
        if self.versions.kubernetes.trim().is_empty() {
            return Err(Error::ConfigError(
                "versions.kubernetes must be set".to_string(),
            ));
        }

        if self.control_plane.hosts.is_empty() {
            return Err(Error::ConfigError(
                "at least one control-plane host is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for host in &self.control_plane.hosts {
            if host.hostname.is_empty() {
                return Err(Error::ConfigError(
                    "control-plane host without hostname".to_string(),
                ));
            }
            if !seen.insert(host.hostname.as_str()) {
                return Err(Error::ConfigError(format!(
                    "duplicate control-plane hostname {:?}",
                    host.hostname
                )));
            }
        }

        Ok(())
    }

    /// Hostname of the host flagged as leader, if any
    pub fn leader(&self) -> Option<&HostConfig> {
        self.control_plane.hosts.iter().find(|h| h.is_leader)
    }
}
