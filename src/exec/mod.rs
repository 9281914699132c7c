//! Remote command execution
//!
//! The investigation only depends on the [`Executor`] and [`Connector`]
//! traits; [`ssh`] provides the OpenSSH-backed implementation used by the
//! binary.

pub mod ssh;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::HostConfig;
use crate::error::{Error, Result};

pub use ssh::{SshConnector, SshExecutor};

/// Exit code reported when the session died before the command finished
pub const EXIT_CODE_SESSION_FAILURE: i32 = -1;

/// Captured result of a command that ran on a host
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands on a single host
#[async_trait]
pub trait Executor: Send + Sync {
    /// Host this executor is connected to
    fn host(&self) -> &str;

    /// Run `command` through the remote shell
    ///
    /// Returns `Ok` whenever the command ran, whatever its exit code.
    /// Transport and session failures are reported as
    /// [`Error::ConnectionError`].
    async fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Run `command` and fail unless it exits with 0
    async fn exec_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.exec(command).await?;
        if output.exit_code < 0 {
            return Err(session_failure(self.host(), command, &output));
        }
        if !output.success() {
            return Err(Error::CommandFailed {
                command: command.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// Opens connections to control-plane hosts
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &HostConfig) -> Result<Arc<dyn Executor>>;
}

/// Error for a command that came back with a negative exit code
pub(crate) fn session_failure(host: &str, command: &str, output: &CommandOutput) -> Error {
    Error::ConnectionError {
        host: host.to_string(),
        message: format!(
            "session failed while running `{}` (exit code {}): {}",
            command,
            output.exit_code,
            output.stderr.trim()
        ),
    }
}
