//! API server health over the `/healthz` endpoint

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Client};
use tracing::debug;

use super::{ApiServerHealth, ApiServerStatus};
use crate::config::{ApiServerConfig, HostConfig};
use crate::error::Result;

const HEALTH_PATH: &str = "/healthz";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Queries each API server directly on its secure port
pub struct HttpApiServerStatus {
    http_client: Client,
    scheme: &'static str,
    port: u16,
}

impl HttpApiServerStatus {
    /// Build a client from the cluster's API server settings
    pub fn new(config: &ApiServerConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent(concat!("cluster-probe/", env!("CARGO_PKG_VERSION")));

        match &config.ca_file {
            Some(ca_file) => {
                let pem = std::fs::read(ca_file)?;
                builder = builder.add_root_certificate(Certificate::from_pem(&pem)?);
            }
            None if config.insecure_skip_tls_verify => {
                builder = builder.danger_accept_invalid_certs(true);
            }
            None => {}
        }

        Ok(Self {
            http_client: builder.build()?,
            scheme: "https",
            port: config.port,
        })
    }

    /// Use a prepared client and scheme, mainly for plain-HTTP endpoints
    pub fn with_client(http_client: Client, scheme: &'static str, port: u16) -> Self {
        Self {
            http_client,
            scheme,
            port,
        }
    }

    fn health_url(&self, host: &HostConfig) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme,
            host.service_address(),
            self.port,
            HEALTH_PATH
        )
    }
}

#[async_trait]
impl ApiServerStatus for HttpApiServerStatus {
    async fn health(&self, host: &HostConfig) -> Result<ApiServerHealth> {
        let url = self.health_url(host);
        debug!("Checking API server health at {}", url);

        let response = self.http_client.get(&url).send().await?;
        if !response.status().is_success() {
            debug!("{} returned HTTP {}", url, response.status());
            return Ok(ApiServerHealth { healthy: false });
        }

        let body = response.text().await?;
        Ok(ApiServerHealth {
            healthy: body.trim() == "ok",
        })
    }
}
