//! One investigation cycle over the control plane
//!
//! The [`Investigator`] probes every configured host in parallel, then, if
//! the cluster turns out to be provisioned, reconciles leadership, etcd
//! membership and the Kubernetes node set.

pub mod coordinator;
pub mod host;
pub mod reconcile;
pub mod report;
pub mod systemd;

#[cfg(test)]
mod reconcile_test;

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::exec::Connector;
use crate::state::{LiveCluster, LiveHost};
use crate::version::parse_version;

pub use coordinator::probe_control_plane;
pub use host::probe_host;
pub use reconcile::{node_drift, NodeDrift, Reconciler, Reconciliation};
pub use report::{ComponentReport, HostReport, InvestigationReport};
pub use systemd::{decode_status, systemd_status};

/// Runs investigation cycles with a fixed set of collaborators
pub struct Investigator {
    connector: Arc<dyn Connector>,
    reconciler: Reconciler,
}

impl Investigator {
    pub fn new(connector: Arc<dyn Connector>, reconciler: Reconciler) -> Self {
        Self {
            connector,
            reconciler,
        }
    }

    /// Probe the cluster described by `cluster` and reconcile it
    ///
    /// `cluster` is validated first, so an empty host list or a duplicated
    /// hostname fails with [`Error::ConfigError`] before any host is probed.
    /// Leader flags found during reconciliation are copied back into
    /// `cluster`, also when reconciliation fails, so a lost quorum leaves no
    /// host marked as leader.
    #[instrument(skip_all, fields(cluster = %cluster.name))]
    pub async fn investigate(&self, cluster: &mut ClusterConfig) -> Result<InvestigationReport> {
        // Every host record is addressed by its hostname from here on
        cluster.validate()?;

        let raw_version = &cluster.versions.kubernetes;
        let expected_version = parse_version(raw_version).map_err(|e| {
            Error::ConfigError(format!("invalid Kubernetes version {raw_version:?}: {e}"))
        })?;

        info!("Investigating cluster, expecting Kubernetes {}", expected_version);

        let live = Arc::new(LiveCluster::new(
            expected_version.clone(),
            &cluster.control_plane.hosts,
        ));
        probe_control_plane(&live, &cluster.control_plane.hosts, Arc::clone(&self.connector))
            .await?;

        let reconciliation = if live.is_provisioned().await {
            let result = self.reconciler.reconcile(&live).await;
            sync_leadership(cluster, &live.hosts().await);
            Some(result?)
        } else {
            info!("Cluster is not provisioned yet, skipping reconciliation");
            None
        };

        Ok(InvestigationReport::new(
            &cluster.name,
            &expected_version,
            &live.hosts().await,
            reconciliation.as_ref(),
        ))
    }
}

/// Copy the leader flags of the probed hosts into the desired configuration
fn sync_leadership(cluster: &mut ClusterConfig, hosts: &[LiveHost]) {
    for desired in cluster.control_plane.hosts.iter_mut() {
        desired.is_leader = hosts
            .iter()
            .any(|h| h.hostname() == desired.hostname && h.config.is_leader);
    }
}
