//! cluster-probe: control-plane investigation for kubeadm-style clusters
//!
//! This crate probes every control-plane host of a cluster over SSH,
//! determines whether the cluster is provisioned, elects a leader among the
//! healthy API servers, checks etcd membership and compares the configured
//! hosts with the node objects known to Kubernetes.

pub mod clusterstatus;
pub mod config;
pub mod error;
pub mod exec;
pub mod investigate;
pub mod state;
pub mod version;

pub use crate::error::{Error, Result};
