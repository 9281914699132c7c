//! Diagnostic report of one investigation cycle

use std::fmt;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::Serialize;
use tracing::{info, warn};

use super::reconcile::{NodeDrift, Reconciliation};
use crate::state::{is_provisioned, Component, EtcdProbe, LiveHost, StatusFlag};

/// Observed state of a systemd-managed component
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReport {
    pub version: Option<String>,
    pub installed: bool,
    pub active: bool,
    pub running: bool,
    pub restarting: bool,
    pub initialized: bool,
}

impl From<&Component> for ComponentReport {
    fn from(component: &Component) -> Self {
        Self {
            version: component.version.as_ref().map(ToString::to_string),
            installed: component.is(StatusFlag::Installed),
            active: component.is(StatusFlag::Active),
            running: component.is(StatusFlag::Running),
            restarting: component.is(StatusFlag::Restarting),
            initialized: component.is(StatusFlag::Initialized),
        }
    }
}

/// Observed state of one control-plane host
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostReport {
    pub hostname: String,
    pub leader: bool,
    pub in_cluster: bool,
    pub container_runtime: ComponentReport,
    pub kubelet: ComponentReport,
    pub api_server_running: bool,
    pub etcd_running: bool,
    pub etcd: EtcdProbe,
}

impl From<&LiveHost> for HostReport {
    fn from(host: &LiveHost) -> Self {
        Self {
            hostname: host.hostname().to_string(),
            leader: host.config.is_leader,
            in_cluster: host.in_cluster,
            container_runtime: ComponentReport::from(&host.container_runtime),
            kubelet: ComponentReport::from(&host.kubelet),
            api_server_running: host.api_server.is(StatusFlag::PodRunning),
            etcd_running: host.etcd.is(StatusFlag::PodRunning),
            etcd: host.etcd_probe.clone(),
        }
    }
}

/// Everything learned about a cluster in one cycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationReport {
    pub cluster: String,
    pub expected_version: String,
    pub generated_at: DateTime<Utc>,
    pub provisioned: bool,
    pub leader: Option<String>,
    pub hosts: Vec<HostReport>,
    pub drift: Option<NodeDrift>,
}

impl InvestigationReport {
    pub fn new(
        cluster: &str,
        expected_version: &Version,
        hosts: &[LiveHost],
        reconciliation: Option<&Reconciliation>,
    ) -> Self {
        Self {
            cluster: cluster.to_string(),
            expected_version: expected_version.to_string(),
            generated_at: Utc::now(),
            provisioned: is_provisioned(hosts),
            leader: reconciliation.map(|r| r.leader.clone()),
            hosts: hosts.iter().map(HostReport::from).collect(),
            drift: reconciliation.map(|r| r.drift.clone()),
        }
    }

    /// Hosts whose etcd lookup failed rather than reported a state
    pub fn etcd_unknown(&self) -> impl Iterator<Item = &HostReport> {
        self.hosts
            .iter()
            .filter(|h| matches!(h.etcd, EtcdProbe::Unknown(_)))
    }

    /// One-line status of the cluster
    pub fn summary(&self) -> String {
        if !self.provisioned {
            return format!(
                "cluster {} is not provisioned ({} hosts probed)",
                self.cluster,
                self.hosts.len()
            );
        }

        let api_servers = self.hosts.iter().filter(|h| h.api_server_running).count();
        let etcd = self.hosts.iter().filter(|h| h.etcd_running).count();
        let drift = match &self.drift {
            Some(d) if !d.is_empty() => format!(
                ", {} hosts to provision, {} nodes to remove",
                d.hosts_to_be_provisioned.len(),
                d.nodes_to_be_removed.len()
            ),
            _ => String::new(),
        };

        format!(
            "cluster {}: leader {}, {}/{} API servers, {}/{} etcd members healthy{}",
            self.cluster,
            self.leader.as_deref().unwrap_or("<none>"),
            api_servers,
            self.hosts.len(),
            etcd,
            self.hosts.len(),
            drift
        )
    }

    /// Emit the report through tracing
    pub fn log(&self) {
        for host in &self.hosts {
            info!(
                host = %host.hostname,
                leader = host.leader,
                in_cluster = host.in_cluster,
                api_server_running = host.api_server_running,
                etcd_running = host.etcd_running,
                etcd = %host.etcd,
                "Control-plane host"
            );
        }

        for host in self.etcd_unknown() {
            warn!("etcd state of {} could not be determined: {}", host.hostname, host.etcd);
        }

        if let Some(drift) = &self.drift {
            info!(
                "Unprovisioned hosts: {:?}, nodes to be removed: {:?}",
                drift.hosts_to_be_provisioned, drift.nodes_to_be_removed
            );
        }

        info!("{}", self.summary());
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

impl fmt::Display for InvestigationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Cluster:          {}", self.cluster)?;
        writeln!(f, "Expected version: {}", self.expected_version)?;
        writeln!(f, "Provisioned:      {}", yes_no(self.provisioned))?;
        writeln!(
            f,
            "Leader:           {}",
            self.leader.as_deref().unwrap_or("<none>")
        )?;

        for host in &self.hosts {
            writeln!(f)?;
            writeln!(f, "Host {}", host.hostname)?;
            for (name, component) in [
                ("docker", &host.container_runtime),
                ("kubelet", &host.kubelet),
            ] {
                writeln!(
                    f,
                    "  {:<8} version={} installed={} active={} running={} restarting={}",
                    name,
                    component.version.as_deref().unwrap_or("-"),
                    yes_no(component.installed),
                    yes_no(component.active),
                    yes_no(component.running),
                    yes_no(component.restarting),
                )?;
            }
            writeln!(
                f,
                "  kubelet initialized={} api-server running={} etcd={} in-cluster={}",
                yes_no(host.kubelet.initialized),
                yes_no(host.api_server_running),
                host.etcd,
                yes_no(host.in_cluster),
            )?;
        }

        if let Some(drift) = &self.drift {
            writeln!(f)?;
            writeln!(f, "Unprovisioned hosts: {:?}", drift.hosts_to_be_provisioned)?;
            writeln!(f, "Nodes to be removed: {:?}", drift.nodes_to_be_removed)?;
        }

        Ok(())
    }
}
