//! Tests for the reconciliation engine
//!
//! These tests cover:
//! - Leader election order and quorum loss
//! - etcd membership, including tolerated per-host failures
//! - Node drift between configuration and the Kubernetes API
//! - Preconditions

#[cfg(test)]
mod tests {
    use super::super::reconcile::*;
    use crate::clusterstatus::{
        ApiServerHealth, ApiServerStatus, EtcdHostStatus, EtcdMember, EtcdStatus, NodeLister,
    };
    use crate::config::{HostConfig, OperatingSystem};
    use crate::error::{Error, Result};
    use crate::state::{EtcdProbe, LiveCluster, StatusFlag};
    use async_trait::async_trait;
    use semver::Version;
    use std::collections::{BTreeSet, HashMap, HashSet};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    /// API servers answer per host: healthy, unhealthy or an error
    struct FakeApiServers {
        health: HashMap<String, Result<bool>>,
    }

    impl FakeApiServers {
        fn new(health: &[(&str, bool)]) -> Self {
            Self {
                health: health
                    .iter()
                    .map(|(host, healthy)| (host.to_string(), Ok(*healthy)))
                    .collect(),
            }
        }

        fn unreachable(mut self, host: &str) -> Self {
            self.health.insert(
                host.to_string(),
                Err(Error::ConnectionError {
                    host: host.to_string(),
                    message: "connection refused".to_string(),
                }),
            );
            self
        }
    }

    #[async_trait]
    impl ApiServerStatus for FakeApiServers {
        async fn health(&self, host: &HostConfig) -> Result<ApiServerHealth> {
            match self.health.get(&host.hostname) {
                Some(Ok(healthy)) => Ok(ApiServerHealth { healthy: *healthy }),
                Some(Err(e)) => Err(Error::ConnectionError {
                    host: host.hostname.clone(),
                    message: e.to_string(),
                }),
                None => Ok(ApiServerHealth::default()),
            }
        }
    }

    /// Every configured host is a healthy etcd member unless listed otherwise
    #[derive(Default)]
    struct FakeEtcd {
        member_list_fails: bool,
        not_members: HashSet<String>,
        failing: HashSet<String>,
    }

    #[async_trait]
    impl EtcdStatus for FakeEtcd {
        async fn member_list(&self) -> Result<Vec<EtcdMember>> {
            if self.member_list_fails {
                return Err(Error::EtcdError("no etcd endpoint answered".to_string()));
            }
            Ok(vec![])
        }

        async fn status(&self, host: &HostConfig, _members: &[EtcdMember]) -> Result<EtcdHostStatus> {
            if self.failing.contains(&host.hostname) {
                return Err(Error::EtcdError("deadline exceeded".to_string()));
            }
            let member = !self.not_members.contains(&host.hostname);
            Ok(EtcdHostStatus {
                member,
                healthy: member,
            })
        }
    }

    struct FakeNodes {
        names: Vec<String>,
    }

    impl FakeNodes {
        fn new(names: &[&str]) -> Self {
            Self {
                names: names.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl NodeLister for FakeNodes {
        async fn list_control_plane_nodes(&self) -> Result<Vec<String>> {
            Ok(self.names.clone())
        }
    }

    /// Helper to build a probed cluster where every host is provisioned
    async fn provisioned_cluster(names: &[&str]) -> LiveCluster {
        let configs: Vec<HostConfig> = names
            .iter()
            .map(|name| HostConfig::new(*name, OperatingSystem::Ubuntu))
            .collect();
        let live = LiveCluster::new(Version::new(1, 18, 2), &configs);
        for host in live.lock().await.iter_mut() {
            host.container_runtime.status |= StatusFlag::Installed | StatusFlag::Running;
            host.kubelet.status |= StatusFlag::Installed | StatusFlag::Running;
        }
        live
    }

    fn reconciler(api: FakeApiServers, etcd: FakeEtcd, nodes: FakeNodes) -> Reconciler {
        Reconciler::new(Arc::new(api), Arc::new(etcd), Arc::new(nodes))
    }

    #[tokio::test]
    async fn test_first_healthy_host_in_order_is_leader() {
        let live = provisioned_cluster(&["a", "b", "c"]).await;
        let reconciler = reconciler(
            FakeApiServers::new(&[("a", false), ("b", true), ("c", true)]),
            FakeEtcd::default(),
            FakeNodes::new(&["a", "b", "c"]),
        );

        let result = assert_ok!(reconciler.reconcile(&live).await);
        assert_eq!(result.leader, "b");
        assert_eq!(live.leader().await.as_deref(), Some("b"));

        let hosts = live.hosts().await;
        assert!(!hosts[0].api_server.is(StatusFlag::PodRunning));
        assert!(hosts[1].api_server.is(StatusFlag::PodRunning));
        assert!(hosts[2].api_server.is(StatusFlag::PodRunning));
        assert!(!hosts[2].config.is_leader);
    }

    #[tokio::test]
    async fn test_previous_leader_flag_is_cleared() {
        let live = provisioned_cluster(&["a", "b"]).await;
        live.lock().await[1].config.is_leader = true;

        let reconciler = reconciler(
            FakeApiServers::new(&[("a", true), ("b", true)]),
            FakeEtcd::default(),
            FakeNodes::new(&["a", "b"]),
        );

        assert_ok!(reconciler.reconcile(&live).await);
        let leaders: Vec<_> = live
            .hosts()
            .await
            .into_iter()
            .filter(|h| h.config.is_leader)
            .map(|h| h.hostname().to_string())
            .collect();
        assert_eq!(leaders, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_no_healthy_api_server_is_quorum_lost() {
        let live = provisioned_cluster(&["a", "b", "c"]).await;
        live.lock().await[0].config.is_leader = true;

        let reconciler = reconciler(
            FakeApiServers::new(&[("a", false), ("b", false), ("c", false)]),
            FakeEtcd::default(),
            FakeNodes::new(&["a", "b", "c"]),
        );

        let err = assert_err!(reconciler.reconcile(&live).await);
        assert!(matches!(err, Error::QuorumLost));
        assert!(live.leader().await.is_none());

        // Nothing after the election ran
        for host in live.hosts().await {
            assert_eq!(host.etcd_probe, EtcdProbe::NotChecked);
            assert!(!host.in_cluster);
        }
    }

    #[tokio::test]
    async fn test_health_error_counts_as_unhealthy() {
        let live = provisioned_cluster(&["a", "b"]).await;
        let reconciler = reconciler(
            FakeApiServers::new(&[("b", true)]).unreachable("a"),
            FakeEtcd::default(),
            FakeNodes::new(&["a", "b"]),
        );

        let result = assert_ok!(reconciler.reconcile(&live).await);
        assert_eq!(result.leader, "b");
        assert!(!live.hosts().await[0].api_server.is(StatusFlag::PodRunning));
    }

    #[tokio::test]
    async fn test_single_etcd_failure_is_tolerated() {
        let live = provisioned_cluster(&["a", "b", "c"]).await;
        let reconciler = reconciler(
            FakeApiServers::new(&[("a", true), ("b", true), ("c", true)]),
            FakeEtcd {
                failing: HashSet::from(["b".to_string()]),
                not_members: HashSet::from(["c".to_string()]),
                ..Default::default()
            },
            FakeNodes::new(&["a", "b", "c"]),
        );

        let result = assert_ok!(reconciler.reconcile(&live).await);
        assert_eq!(result.leader, "a");

        let hosts = live.hosts().await;
        assert_eq!(hosts[0].etcd_probe, EtcdProbe::Healthy);
        assert!(hosts[0].etcd.is(StatusFlag::PodRunning));
        assert!(matches!(&hosts[1].etcd_probe, EtcdProbe::Unknown(reason) if reason.contains("deadline")));
        assert!(!hosts[1].etcd.is(StatusFlag::PodRunning));
        assert_eq!(hosts[2].etcd_probe, EtcdProbe::NotRunning);

        // The failure on b did not keep the other hosts from being recorded
        assert!(hosts.iter().all(|h| h.api_server.is(StatusFlag::PodRunning)));
        assert!(hosts.iter().all(|h| h.in_cluster));
    }

    #[tokio::test]
    async fn test_member_list_failure_aborts() {
        let live = provisioned_cluster(&["a"]).await;
        let reconciler = reconciler(
            FakeApiServers::new(&[("a", true)]),
            FakeEtcd {
                member_list_fails: true,
                ..Default::default()
            },
            FakeNodes::new(&["a"]),
        );

        let err = assert_err!(reconciler.reconcile(&live).await);
        assert!(matches!(err, Error::EtcdError(_)));
        assert!(!live.hosts().await[0].in_cluster);
    }

    #[tokio::test]
    async fn test_node_drift() {
        let live = provisioned_cluster(&["h1", "h2", "h3"]).await;
        let reconciler = reconciler(
            FakeApiServers::new(&[("h1", true), ("h2", true), ("h3", true)]),
            FakeEtcd::default(),
            FakeNodes::new(&["h2", "h3", "h4"]),
        );

        let result = assert_ok!(reconciler.reconcile(&live).await);
        assert_eq!(
            result.drift.hosts_to_be_provisioned,
            BTreeSet::from(["h1".to_string()])
        );
        assert_eq!(
            result.drift.nodes_to_be_removed,
            BTreeSet::from(["h4".to_string()])
        );

        let in_cluster: Vec<bool> = live.hosts().await.iter().map(|h| h.in_cluster).collect();
        assert_eq!(in_cluster, vec![false, true, true]);
    }

    #[test]
    fn test_node_drift_of_matching_sets_is_empty() {
        let names: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
        assert!(node_drift(&names, &names).is_empty());
    }

    #[tokio::test]
    async fn test_unprovisioned_cluster_is_rejected() {
        let configs = vec![HostConfig::new("a", OperatingSystem::Ubuntu)];
        let live = LiveCluster::new(Version::new(1, 18, 2), &configs);
        let reconciler = reconciler(
            FakeApiServers::new(&[("a", true)]),
            FakeEtcd::default(),
            FakeNodes::new(&["a"]),
        );

        let err = assert_err!(reconciler.reconcile(&live).await);
        assert!(matches!(err, Error::InvariantError(_)));
        assert!(live.leader().await.is_none());
    }
}
