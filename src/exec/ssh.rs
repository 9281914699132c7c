//! OpenSSH-backed command execution

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{CommandOutput, Connector, Executor, EXIT_CODE_SESSION_FAILURE};
use crate::config::HostConfig;
use crate::error::{Error, Result};

/// Exit status the ssh client uses for its own failures
const SSH_CLIENT_FAILURE: i32 = 255;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection to one host through the system `ssh` binary
#[derive(Clone, Debug)]
pub struct SshExecutor {
    hostname: String,
    destination: String,
    port: u16,
    private_key_file: Option<String>,
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new(host: &HostConfig, connect_timeout: Duration) -> Self {
        Self {
            hostname: host.hostname.clone(),
            destination: format!("{}@{}", host.ssh_username, host.ssh_address()),
            port: host.ssh_port,
            private_key_file: host.ssh_private_key_file.clone(),
            connect_timeout,
        }
    }

    fn build_ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            self.port.to_string(),
        ];

        if let Some(key) = &self.private_key_file {
            args.extend(["-i".to_string(), key.clone()]);
        }

        args.push(self.destination.clone());
        args
    }
}

#[async_trait]
impl Executor for SshExecutor {
    fn host(&self) -> &str {
        &self.hostname
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput> {
        debug!("Running on {}: {}", self.hostname, command);

        let mut args = self.build_ssh_args();
        args.push(command.to_string());

        let output = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::ConnectionError {
                host: self.hostname.clone(),
                message: format!("failed to spawn ssh: {e}"),
            })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(EXIT_CODE_SESSION_FAILURE),
        };

        match result.exit_code {
            SSH_CLIENT_FAILURE | EXIT_CODE_SESSION_FAILURE => {
                warn!(
                    "ssh to {} failed (exit code {}): {}",
                    self.hostname,
                    result.exit_code,
                    result.stderr.trim()
                );
                Err(Error::ConnectionError {
                    host: self.hostname.clone(),
                    message: result.stderr.trim().to_string(),
                })
            }
            _ => Ok(result),
        }
    }
}

/// Opens [`SshExecutor`]s, checking reachability first
#[derive(Clone, Debug)]
pub struct SshConnector {
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for SshConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &HostConfig) -> Result<Arc<dyn Executor>> {
        let executor = SshExecutor::new(host, self.connect_timeout);
        executor.exec_checked("true").await?;
        debug!("Connected to {} via ssh", host.hostname);
        Ok(Arc::new(executor))
    }
}
