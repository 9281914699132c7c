//! Per-host probes for the container runtime and kubelet

use tracing::{debug, instrument};

use super::systemd::systemd_status;
use crate::config::PackageFamily;
use crate::error::Result;
use crate::exec::{session_failure, Executor};
use crate::state::{LiveHost, StatusFlag};
use crate::version::{parse_version, unmanaged_version};

pub const DOCKER_VERSION_DPKG: &str =
    "dpkg-query --show --showformat='${Version}' docker-ce | cut -d: -f2 | cut -d~ -f1";
pub const DOCKER_VERSION_RPM: &str = "rpm -qa --queryformat '%{RPMTAG_VERSION}' docker-ce";

pub const KUBELET_VERSION_DPKG: &str =
    "dpkg-query --show --showformat='${Version}' kubelet | cut -d- -f1";
pub const KUBELET_VERSION_RPM: &str = "rpm -qa --queryformat '%{RPMTAG_VERSION}' kubelet";
pub const KUBELET_VERSION_CLI: &str = "kubelet --version | cut -d' ' -f2";

/// Exists once kubelet has been bootstrapped into the cluster
pub const KUBELET_INITIALIZED: &str = "test -f /etc/kubernetes/kubelet.conf";

/// Run all host checks in order, stopping at the first failure
#[instrument(skip(host, conn), fields(hostname = %host.hostname()))]
pub async fn probe_host(host: &mut LiveHost, conn: &dyn Executor) -> Result<()> {
    detect_container_runtime(host, conn).await?;
    detect_kubelet(host, conn).await?;
    detect_kubelet_initialized(host, conn).await?;
    Ok(())
}

/// Detect whether docker is installed and which version runs
pub async fn detect_container_runtime(host: &mut LiveHost, conn: &dyn Executor) -> Result<()> {
    host.container_runtime.status = systemd_status(conn, "docker").await?;

    if !host.container_runtime.is_installed() {
        debug!("docker is not installed on {}", host.hostname());
        return Ok(());
    }

    let command = match host.config.operating_system.family() {
        PackageFamily::Rpm => DOCKER_VERSION_RPM,
        PackageFamily::Dpkg => DOCKER_VERSION_DPKG,
        PackageFamily::Immutable => {
            // The runtime ships with the OS image and is never upgraded on its own
            host.container_runtime.version = Some(unmanaged_version());
            return Ok(());
        }
        PackageFamily::Unknown => return Ok(()),
    };

    let output = conn.exec_checked(command).await?;
    host.container_runtime.version = Some(parse_version(&output.stdout)?);

    Ok(())
}

/// Detect whether kubelet is installed and which version runs
pub async fn detect_kubelet(host: &mut LiveHost, conn: &dyn Executor) -> Result<()> {
    host.kubelet.status = systemd_status(conn, "kubelet").await?;

    if !host.kubelet.is_installed() {
        debug!("kubelet is not installed on {}", host.hostname());
        return Ok(());
    }

    let command = match host.config.operating_system.family() {
        PackageFamily::Rpm => KUBELET_VERSION_RPM,
        PackageFamily::Dpkg => KUBELET_VERSION_DPKG,
        PackageFamily::Immutable => KUBELET_VERSION_CLI,
        PackageFamily::Unknown => return Ok(()),
    };

    let output = conn.exec_checked(command).await?;
    host.kubelet.version = Some(parse_version(&output.stdout)?);

    Ok(())
}

/// Check whether kubelet has been initialized on the host
///
/// A failing check is not an error; only a broken session is.
pub async fn detect_kubelet_initialized(host: &mut LiveHost, conn: &dyn Executor) -> Result<()> {
    let output = conn.exec(KUBELET_INITIALIZED).await?;

    if output.exit_code < 0 {
        return Err(session_failure(conn.host(), KUBELET_INITIALIZED, &output));
    }

    if output.success() {
        host.kubelet.status |= StatusFlag::Initialized;
    }

    Ok(())
}
