//! Live state of a cluster as observed during one investigation cycle

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use semver::Version;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::config::HostConfig;

/// A single fact observed about a component
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StatusFlag {
    /// Unit file is loaded by the service manager
    Installed = 1 << 0,
    /// Service is active or activating
    Active = 1 << 1,
    Running = 1 << 2,
    Restarting = 1 << 3,
    Dead = 1 << 4,
    /// Service sub-state was none of running, auto-restart or dead
    Unknown = 1 << 5,
    /// kubelet has joined the cluster and written its kubeconfig
    Initialized = 1 << 6,
    /// Static pod is up and healthy
    PodRunning = 1 << 7,
}

impl StatusFlag {
    pub const ALL: [StatusFlag; 8] = [
        StatusFlag::Installed,
        StatusFlag::Active,
        StatusFlag::Running,
        StatusFlag::Restarting,
        StatusFlag::Dead,
        StatusFlag::Unknown,
        StatusFlag::Initialized,
        StatusFlag::PodRunning,
    ];

    /// Flags of which a decoded service status carries exactly one
    pub const SUB_STATES: [StatusFlag; 4] = [
        StatusFlag::Running,
        StatusFlag::Restarting,
        StatusFlag::Dead,
        StatusFlag::Unknown,
    ];

    const fn bits(self) -> u16 {
        self as u16
    }
}

/// Set of [`StatusFlag`]s accumulated for a component
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ComponentStatus(u16);

impl ComponentStatus {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, flag: StatusFlag) -> bool {
        self.0 & flag.bits() != 0
    }

    pub fn insert(&mut self, flag: StatusFlag) {
        self.0 |= flag.bits();
    }

    pub fn remove(&mut self, flag: StatusFlag) {
        self.0 &= !flag.bits();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Flags contained in this set, in declaration order
    pub fn iter(self) -> impl Iterator<Item = StatusFlag> {
        StatusFlag::ALL.into_iter().filter(move |f| self.contains(*f))
    }
}

impl From<StatusFlag> for ComponentStatus {
    fn from(flag: StatusFlag) -> Self {
        Self(flag.bits())
    }
}

impl BitOr for ComponentStatus {
    type Output = ComponentStatus;

    fn bitor(self, rhs: ComponentStatus) -> ComponentStatus {
        ComponentStatus(self.0 | rhs.0)
    }
}

impl BitOr<StatusFlag> for ComponentStatus {
    type Output = ComponentStatus;

    fn bitor(self, rhs: StatusFlag) -> ComponentStatus {
        ComponentStatus(self.0 | rhs.bits())
    }
}

impl BitOr for StatusFlag {
    type Output = ComponentStatus;

    fn bitor(self, rhs: StatusFlag) -> ComponentStatus {
        ComponentStatus(self.bits() | rhs.bits())
    }
}

impl BitOrAssign for ComponentStatus {
    fn bitor_assign(&mut self, rhs: ComponentStatus) {
        self.0 |= rhs.0;
    }
}

impl BitOrAssign<StatusFlag> for ComponentStatus {
    fn bitor_assign(&mut self, rhs: StatusFlag) {
        self.insert(rhs);
    }
}

impl fmt::Debug for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Observed status and version of one component on a host
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Component {
    pub status: ComponentStatus,
    pub version: Option<Version>,
}

impl Component {
    pub fn is(&self, flag: StatusFlag) -> bool {
        self.status.contains(flag)
    }

    pub fn is_installed(&self) -> bool {
        self.is(StatusFlag::Installed)
    }
}

/// Outcome of the per-host etcd lookup
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "camelCase")]
pub enum EtcdProbe {
    /// Reconciliation has not reached this host
    #[default]
    NotChecked,
    /// Member of the cluster and healthy
    Healthy,
    /// Looked up successfully, but not a healthy member
    NotRunning,
    /// The lookup itself failed
    Unknown(String),
}

impl fmt::Display for EtcdProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtcdProbe::NotChecked => write!(f, "not checked"),
            EtcdProbe::Healthy => write!(f, "healthy"),
            EtcdProbe::NotRunning => write!(f, "not running"),
            EtcdProbe::Unknown(reason) => write!(f, "unknown ({reason})"),
        }
    }
}

/// Live state of one control-plane host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LiveHost {
    pub config: HostConfig,
    pub container_runtime: Component,
    pub kubelet: Component,
    pub api_server: Component,
    pub etcd: Component,
    pub etcd_probe: EtcdProbe,
    /// A Kubernetes node object with this hostname exists
    pub in_cluster: bool,
}

impl LiveHost {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            container_runtime: Component::default(),
            kubelet: Component::default(),
            api_server: Component::default(),
            etcd: Component::default(),
            etcd_probe: EtcdProbe::default(),
            in_cluster: false,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.config.hostname
    }

    /// Both the container runtime and kubelet are installed
    pub fn is_provisioned(&self) -> bool {
        self.container_runtime.is_installed() && self.kubelet.is_installed()
    }
}

/// Aggregate of all control-plane hosts for one investigation cycle
///
/// Hosts are kept in the order of the desired configuration. Every mutation
/// of a host record goes through [`LiveCluster::lock`].
#[derive(Debug)]
pub struct LiveCluster {
    pub expected_version: Version,
    control_plane: Mutex<Vec<LiveHost>>,
}

impl LiveCluster {
    /// Build an empty live record for every configured host
    pub fn new(expected_version: Version, hosts: &[HostConfig]) -> Self {
        Self {
            expected_version,
            control_plane: Mutex::new(hosts.iter().cloned().map(LiveHost::new).collect()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, Vec<LiveHost>> {
        self.control_plane.lock().await
    }

    /// Copy of the current host records
    pub async fn hosts(&self) -> Vec<LiveHost> {
        self.lock().await.clone()
    }

    /// At least one host has both the container runtime and kubelet installed
    pub async fn is_provisioned(&self) -> bool {
        is_provisioned(&self.lock().await)
    }

    /// Hostname of the elected leader, if any
    pub async fn leader(&self) -> Option<String> {
        self.lock()
            .await
            .iter()
            .find(|h| h.config.is_leader)
            .map(|h| h.hostname().to_string())
    }

    pub fn into_hosts(self) -> Vec<LiveHost> {
        self.control_plane.into_inner()
    }
}

/// Provisioning predicate over a set of host records
pub fn is_provisioned(hosts: &[LiveHost]) -> bool {
    hosts.iter().any(LiveHost::is_provisioned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatingSystem;

    fn hosts(names: &[&str]) -> Vec<HostConfig> {
        names
            .iter()
            .map(|n| HostConfig::new(*n, OperatingSystem::Ubuntu))
            .collect()
    }

    #[test]
    fn test_flags_combine() {
        let mut status = StatusFlag::Installed | StatusFlag::Active;
        status |= StatusFlag::Running;

        assert!(status.contains(StatusFlag::Installed));
        assert!(status.contains(StatusFlag::Active));
        assert!(status.contains(StatusFlag::Running));
        assert!(!status.contains(StatusFlag::Dead));
        assert_eq!(status.iter().count(), 3);
    }

    #[test]
    fn test_flag_set_operations() {
        let mut status = ComponentStatus::empty();
        assert!(status.is_empty());

        status.insert(StatusFlag::PodRunning);
        status |= ComponentStatus::from(StatusFlag::Initialized);
        assert_eq!(
            status,
            StatusFlag::Initialized | StatusFlag::PodRunning
        );

        status.remove(StatusFlag::PodRunning);
        assert_eq!(status, ComponentStatus::from(StatusFlag::Initialized));
        assert_eq!(format!("{status:?}"), "{Initialized}");
    }

    #[test]
    fn test_host_provisioned_requires_both_components() {
        let mut host = LiveHost::new(HostConfig::new("cp-0", OperatingSystem::Ubuntu));
        assert!(!host.is_provisioned());

        host.container_runtime.status |= StatusFlag::Installed;
        assert!(!host.is_provisioned());

        host.kubelet.status |= StatusFlag::Installed;
        assert!(host.is_provisioned());
    }

    #[tokio::test]
    async fn test_live_cluster_preserves_config_order() {
        let live = LiveCluster::new(Version::new(1, 18, 2), &hosts(&["cp-2", "cp-0", "cp-1"]));

        let names: Vec<String> = live
            .hosts()
            .await
            .iter()
            .map(|h| h.hostname().to_string())
            .collect();
        assert_eq!(names, vec!["cp-2", "cp-0", "cp-1"]);
        assert!(!live.is_provisioned().await);
        assert!(live.leader().await.is_none());
    }

    #[tokio::test]
    async fn test_live_cluster_provisioned_when_any_host_is() {
        let live = LiveCluster::new(Version::new(1, 18, 2), &hosts(&["cp-0", "cp-1"]));
        {
            let mut guard = live.lock().await;
            guard[1].container_runtime.status |= StatusFlag::Installed;
            guard[1].kubelet.status |= StatusFlag::Installed;
        }
        assert!(live.is_provisioned().await);
    }

    #[test]
    fn test_etcd_probe_display() {
        assert_eq!(EtcdProbe::NotRunning.to_string(), "not running");
        assert_eq!(
            EtcdProbe::Unknown("timeout".to_string()).to_string(),
            "unknown (timeout)"
        );
    }
}
