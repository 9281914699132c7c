//! Leader election, quorum and drift detection for a provisioned cluster

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::clusterstatus::{ApiServerStatus, EtcdStatus, NodeLister};
use crate::error::{Error, Result};
use crate::state::{is_provisioned, EtcdProbe, LiveCluster, LiveHost, StatusFlag};

/// Divergence between configured hosts and live control-plane nodes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDrift {
    /// Configured hosts without a node object
    pub hosts_to_be_provisioned: BTreeSet<String>,
    /// Node objects without a configured host
    pub nodes_to_be_removed: BTreeSet<String>,
}

impl NodeDrift {
    pub fn is_empty(&self) -> bool {
        self.hosts_to_be_provisioned.is_empty() && self.nodes_to_be_removed.is_empty()
    }
}

/// Compare configured host identities with live node names
///
/// Node objects are named after the host they run on, so the two sets can be
/// compared directly.
pub fn node_drift(configured: &BTreeSet<String>, live: &BTreeSet<String>) -> NodeDrift {
    NodeDrift {
        hosts_to_be_provisioned: configured.difference(live).cloned().collect(),
        nodes_to_be_removed: live.difference(configured).cloned().collect(),
    }
}

/// Outcome of reconciling a provisioned cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reconciliation {
    pub leader: String,
    pub drift: NodeDrift,
}

/// Reconciles the probed host records against the cluster's own view
pub struct Reconciler {
    api_server: Arc<dyn ApiServerStatus>,
    etcd: Arc<dyn EtcdStatus>,
    nodes: Arc<dyn NodeLister>,
}

impl Reconciler {
    pub fn new(
        api_server: Arc<dyn ApiServerStatus>,
        etcd: Arc<dyn EtcdStatus>,
        nodes: Arc<dyn NodeLister>,
    ) -> Self {
        Self {
            api_server,
            etcd,
            nodes,
        }
    }

    /// Elect a leader, check etcd and diff the node set
    ///
    /// Fails with [`Error::QuorumLost`] when no API server is healthy, in
    /// which case no further checks run.
    #[instrument(skip_all)]
    pub async fn reconcile(&self, live: &LiveCluster) -> Result<Reconciliation> {
        let leader = {
            let mut hosts = live.lock().await;

            if !is_provisioned(&hosts) {
                return Err(Error::InvariantError(
                    "unable to reconcile a cluster that is not provisioned".to_string(),
                ));
            }

            let leader = self.elect_leader(&mut hosts).await?;
            self.check_etcd(&mut hosts).await?;
            leader
        };

        let drift = self.reconcile_nodes(live).await?;

        info!(
            leader = %leader,
            hosts_to_be_provisioned = ?drift.hosts_to_be_provisioned,
            nodes_to_be_removed = ?drift.nodes_to_be_removed,
            "Cluster reconciled"
        );

        Ok(Reconciliation { leader, drift })
    }

    /// Mark the first host with a healthy API server as leader
    async fn elect_leader(&self, hosts: &mut [LiveHost]) -> Result<String> {
        for host in hosts.iter_mut() {
            host.config.is_leader = false;
        }

        let mut leader: Option<String> = None;
        for host in hosts.iter_mut() {
            let healthy = match self.api_server.health(&host.config).await {
                Ok(health) => health.healthy,
                Err(e) => {
                    warn!("API server health check on {} failed: {}", host.hostname(), e);
                    false
                }
            };

            if !healthy {
                debug!("API server on {} is not healthy", host.hostname());
                continue;
            }

            host.api_server.status |= StatusFlag::PodRunning;
            if leader.is_none() {
                host.config.is_leader = true;
                leader = Some(host.hostname().to_string());
            }
        }

        match leader {
            Some(leader) => {
                info!("Elected {} as leader", leader);
                Ok(leader)
            }
            None => {
                error!("Failed to elect leader.");
                error!("Quorum is most likely lost, manual cluster repair might be needed.");
                error!("Consult the etcd disaster recovery documentation for further steps.");
                Err(Error::QuorumLost)
            }
        }
    }

    /// Record etcd membership and health for every host
    ///
    /// A lookup failure on one host only degrades that host's record.
    async fn check_etcd(&self, hosts: &mut [LiveHost]) -> Result<()> {
        let members = self.etcd.member_list().await?;
        debug!("etcd has {} members", members.len());

        for host in hosts.iter_mut() {
            host.etcd_probe = match self.etcd.status(&host.config, &members).await {
                Ok(status) if status.member && status.healthy => {
                    host.etcd.status |= StatusFlag::PodRunning;
                    EtcdProbe::Healthy
                }
                Ok(_) => EtcdProbe::NotRunning,
                Err(e) => {
                    warn!("etcd status for {} is unknown: {}", host.hostname(), e);
                    EtcdProbe::Unknown(e.to_string())
                }
            };
        }

        Ok(())
    }

    /// Match configured hosts against control-plane node objects
    async fn reconcile_nodes(&self, live: &LiveCluster) -> Result<NodeDrift> {
        let node_names = self.nodes.list_control_plane_nodes().await?;
        let live_nodes: BTreeSet<String> = node_names.into_iter().collect();

        let mut hosts = live.lock().await;
        let configured: BTreeSet<String> =
            hosts.iter().map(|h| h.hostname().to_string()).collect();

        for host in hosts.iter_mut() {
            host.in_cluster = live_nodes.contains(host.hostname());
        }

        Ok(node_drift(&configured, &live_nodes))
    }
}
