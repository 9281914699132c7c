//! etcd membership and health through the v3 JSON gateway

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client, Identity, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{EtcdHostStatus, EtcdStatus};
use crate::config::{ClusterConfig, HostConfig};
use crate::error::{Error, Result};

const MEMBER_LIST_PATH: &str = "/v3/cluster/member/list";
const HEALTH_PATH: &str = "/health";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A member of the etcd cluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct EtcdMember {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "peerURLs", default)]
    pub peer_urls: Vec<String>,

    #[serde(rename = "clientURLs", default)]
    pub client_urls: Vec<String>,
}

impl EtcdMember {
    /// Whether this member runs on `host`
    pub fn runs_on(&self, host: &HostConfig) -> bool {
        if self.name == host.hostname {
            return true;
        }

        let address = host.service_address();
        !address.is_empty()
            && self
                .peer_urls
                .iter()
                .any(|url| url_host(url).as_deref() == Some(address))
    }
}

/// Host part of a peer URL, IPv6 addresses without brackets
fn url_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

#[derive(Debug, Deserialize)]
struct MemberListResponse {
    #[serde(default)]
    members: Vec<EtcdMember>,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    health: String,
}

/// Talks to the etcd instances of every control-plane host
pub struct HttpEtcdStatus {
    http_client: Client,
    scheme: &'static str,
    port: u16,
    endpoints: Vec<String>,
}

impl HttpEtcdStatus {
    /// Build a client from the cluster's etcd TLS settings
    pub fn new(config: &ClusterConfig) -> Result<Self> {
        let etcd = &config.etcd;
        let mut builder = Client::builder()
            .use_rustls_tls()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("cluster-probe/", env!("CARGO_PKG_VERSION")));

        if let Some(ca_file) = &etcd.ca_file {
            let pem = std::fs::read(ca_file)?;
            builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
        }

        match (&etcd.cert_file, &etcd.key_file) {
            (Some(cert_file), Some(key_file)) => {
                let mut pem = std::fs::read(cert_file)?;
                pem.extend_from_slice(b"\n");
                pem.extend(std::fs::read(key_file)?);
                builder = builder.identity(Identity::from_pem(&pem)?);
            }
            (None, None) => {}
            _ => {
                return Err(Error::ConfigError(
                    "etcd certFile and keyFile must be set together".to_string(),
                ));
            }
        }

        if etcd.insecure_skip_tls_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let endpoints = config
            .control_plane
            .hosts
            .iter()
            .map(|h| h.service_address().to_string())
            .collect();

        Ok(Self {
            http_client: builder.build()?,
            scheme: "https",
            port: etcd.port,
            endpoints,
        })
    }

    /// Use a prepared client against the given endpoint addresses
    pub fn with_client(
        http_client: Client,
        scheme: &'static str,
        port: u16,
        endpoints: Vec<String>,
    ) -> Self {
        Self {
            http_client,
            scheme,
            port,
            endpoints,
        }
    }

    fn url(&self, address: &str, path: &str) -> String {
        format!("{}://{}:{}{}", self.scheme, address, self.port, path)
    }

    async fn fetch_members(&self, address: &str) -> Result<Vec<EtcdMember>> {
        let response = self
            .http_client
            .post(self.url(address, MEMBER_LIST_PATH))
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?;

        let list: MemberListResponse = response.json().await?;
        Ok(list.members)
    }

    async fn fetch_health(&self, address: &str) -> Result<bool> {
        let response = self
            .http_client
            .get(self.url(address, HEALTH_PATH))
            .send()
            .await?;

        if !response.status().is_success() {
            return Ok(false);
        }

        let health: HealthResponse = response.json().await?;
        Ok(health.health == "true")
    }
}

#[async_trait]
impl EtcdStatus for HttpEtcdStatus {
    async fn member_list(&self) -> Result<Vec<EtcdMember>> {
        let mut last_error = None;

        for endpoint in &self.endpoints {
            match self.fetch_members(endpoint).await {
                Ok(members) => {
                    debug!("etcd at {} reports {} members", endpoint, members.len());
                    return Ok(members);
                }
                Err(e) => {
                    warn!("Failed to list etcd members via {}: {}", endpoint, e);
                    last_error = Some(e);
                }
            }
        }

        Err(Error::EtcdError(match last_error {
            Some(e) => format!("no etcd endpoint answered the member list: {e}"),
            None => "no etcd endpoints configured".to_string(),
        }))
    }

    async fn status(&self, host: &HostConfig, members: &[EtcdMember]) -> Result<EtcdHostStatus> {
        if !members.iter().any(|m| m.runs_on(host)) {
            debug!("{} is not an etcd member", host.hostname);
            return Ok(EtcdHostStatus::default());
        }

        let healthy = self.fetch_health(host.service_address()).await?;
        Ok(EtcdHostStatus {
            member: true,
            healthy,
        })
    }
}
