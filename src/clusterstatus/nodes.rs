//! Control-plane node listing through the Kubernetes API

use std::path::PathBuf;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, ResourceExt};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::NodeLister;
use crate::error::{Error, Result};

/// Label kubeadm puts on control-plane nodes
pub const LABEL_CONTROL_PLANE_NODE: &str = "node-role.kubernetes.io/master";

/// Lists nodes with a lazily constructed, process-wide client
pub struct KubeNodeLister {
    kubeconfig: Option<PathBuf>,
    client: OnceCell<Client>,
}

impl KubeNodeLister {
    /// Use `kubeconfig` if given, otherwise the default client configuration
    pub fn new(kubeconfig: Option<PathBuf>) -> Self {
        Self {
            kubeconfig,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> Result<&Client> {
        self.client
            .get_or_try_init(|| async {
                let client = match &self.kubeconfig {
                    Some(path) => {
                        debug!("Building Kubernetes client from {}", path.display());
                        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                            Error::ConfigError(format!(
                                "unable to read kubeconfig {}: {e}",
                                path.display()
                            ))
                        })?;
                        let config = Config::from_custom_kubeconfig(
                            kubeconfig,
                            &KubeConfigOptions::default(),
                        )
                        .await
                        .map_err(|e| Error::ConfigError(format!("invalid kubeconfig: {e}")))?;
                        Client::try_from(config)?
                    }
                    None => Client::try_default().await?,
                };
                info!("Connected to Kubernetes cluster");
                Ok::<_, Error>(client)
            })
            .await
    }
}

#[async_trait]
impl NodeLister for KubeNodeLister {
    async fn list_control_plane_nodes(&self) -> Result<Vec<String>> {
        let nodes: Api<Node> = Api::all(self.client().await?.clone());
        let params = ListParams::default().labels(LABEL_CONTROL_PLANE_NODE);

        let list = nodes.list(&params).await?;
        let names: Vec<String> = list.items.iter().map(|n| n.name_any()).collect();
        debug!("Control-plane nodes: {:?}", names);

        Ok(names)
    }
}
