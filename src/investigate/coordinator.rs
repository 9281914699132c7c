//! Parallel probing of all control-plane hosts
//!
//! One task is spawned per host. Each task takes a snapshot of its host
//! record under the cluster lock, probes the host without holding the lock
//! and writes the snapshot back at the same index. Every task is joined
//! before returning, so no task can touch the aggregate afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::{Id, JoinSet};
use tracing::{error, info, instrument, warn};

use super::host::probe_host;
use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::exec::Connector;
use crate::state::{LiveCluster, LiveHost, StatusFlag};

/// Probe every target host concurrently and record the results in `live`
///
/// Returns the first error any task produced, after all tasks finished. A
/// panicking task is reported as [`Error::TaskFailed`] naming its host.
pub async fn probe_control_plane(
    live: &Arc<LiveCluster>,
    targets: &[HostConfig],
    connector: Arc<dyn Connector>,
) -> Result<()> {
    info!("Probing {} control-plane hosts", targets.len());

    let mut tasks = JoinSet::new();
    let mut task_hosts: HashMap<Id, String> = HashMap::with_capacity(targets.len());
    for target in targets {
        let live = Arc::clone(live);
        let connector = Arc::clone(&connector);
        let target = target.clone();
        let hostname = target.hostname.clone();

        let handle = tasks.spawn(async move {
            let result = investigate_host(&live, connector.as_ref(), &target).await;
            (target.hostname, result)
        });
        task_hosts.insert(handle.id(), hostname);
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        let (hostname, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                let hostname = task_hosts
                    .remove(&e.id())
                    .unwrap_or_else(|| "<unknown>".to_string());
                let message = format!("task for {hostname} failed: {e}");
                (hostname, Err(Error::TaskFailed(message)))
            }
        };

        if let Err(e) = result {
            if first_error.is_none() {
                error!("Probing {} failed: {}", hostname, e);
                first_error = Some(e);
            } else {
                warn!("Probing {} also failed: {}", hostname, e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[instrument(skip(live, connector, target), fields(hostname = %target.hostname))]
async fn investigate_host(
    live: &LiveCluster,
    connector: &dyn Connector,
    target: &HostConfig,
) -> Result<()> {
    let (index, mut host) = {
        let hosts = live.lock().await;
        hosts
            .iter()
            .position(|h| h.hostname() == target.hostname)
            .map(|i| (i, hosts[i].clone()))
            .ok_or_else(|| Error::IdentityMismatch(target.hostname.clone()))?
    };

    let conn = connector.connect(&host.config).await?;
    probe_host(&mut host, conn.as_ref()).await?;

    let mut hosts = live.lock().await;
    match hosts.get_mut(index) {
        Some(slot) if slot.hostname() == host.hostname() => {
            log_host_summary(&host);
            *slot = host;
            Ok(())
        }
        _ => Err(Error::IdentityMismatch(target.hostname.clone())),
    }
}

fn log_host_summary(host: &LiveHost) {
    let runtime = &host.container_runtime;
    let kubelet = &host.kubelet;

    info!(
        host = %host.hostname(),
        docker_version = ?runtime.version.as_ref().map(ToString::to_string),
        docker_installed = runtime.is(StatusFlag::Installed),
        docker_running = runtime.is(StatusFlag::Running),
        docker_active = runtime.is(StatusFlag::Active),
        docker_restarting = runtime.is(StatusFlag::Restarting),
        kubelet_version = ?kubelet.version.as_ref().map(ToString::to_string),
        kubelet_installed = kubelet.is(StatusFlag::Installed),
        kubelet_running = kubelet.is(StatusFlag::Running),
        kubelet_active = kubelet.is(StatusFlag::Active),
        kubelet_restarting = kubelet.is(StatusFlag::Restarting),
        kubelet_initialized = kubelet.is(StatusFlag::Initialized),
        "Host probed"
    );
}
