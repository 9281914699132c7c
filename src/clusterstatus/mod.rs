//! Status sources consulted while reconciling a provisioned cluster
//!
//! The reconciliation engine talks to the API servers, etcd and the
//! Kubernetes API only through the traits in this module.

pub mod apiserver;
pub mod etcd;
pub mod nodes;

use async_trait::async_trait;

use crate::config::HostConfig;
use crate::error::Result;

pub use apiserver::HttpApiServerStatus;
pub use etcd::{EtcdMember, HttpEtcdStatus};
pub use nodes::{KubeNodeLister, LABEL_CONTROL_PLANE_NODE};

/// Health of the API server on one host
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApiServerHealth {
    pub healthy: bool,
}

/// etcd membership and health of one host
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EtcdHostStatus {
    pub member: bool,
    pub healthy: bool,
}

#[async_trait]
pub trait ApiServerStatus: Send + Sync {
    async fn health(&self, host: &HostConfig) -> Result<ApiServerHealth>;
}

#[async_trait]
pub trait EtcdStatus: Send + Sync {
    /// Current etcd cluster membership
    async fn member_list(&self) -> Result<Vec<EtcdMember>>;

    /// Membership and health of the etcd instance on `host`
    async fn status(&self, host: &HostConfig, members: &[EtcdMember]) -> Result<EtcdHostStatus>;
}

#[async_trait]
pub trait NodeLister: Send + Sync {
    /// Names of the nodes carrying the control-plane label
    async fn list_control_plane_nodes(&self) -> Result<Vec<String>>;
}
