//! Error types for cluster investigation

use thiserror::Error;

/// Errors produced while investigating a cluster
#[derive(Error, Debug)]
pub enum Error {
    /// Desired configuration is malformed (bad manifest, unparsable version)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Transport or session failure while talking to a host
    #[error("Connection to {host} failed: {message}")]
    ConnectionError { host: String, message: String },

    /// A remote command ran but exited with a failure code
    #[error("Command `{command}` exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Structured command output could not be decoded
    #[error("Failed to parse {message}, output was: {raw:?}")]
    ParseError { message: String, raw: String },

    /// Version string reported by a host is not a valid semantic version
    #[error("Invalid version {raw:?}: {source}")]
    VersionParseError {
        raw: String,
        #[source]
        source: semver::Error,
    },

    /// Live cluster bookkeeping no longer matches the desired configuration
    #[error("Host {0:?} is not part of the live cluster")]
    IdentityMismatch(String),

    /// No control-plane host reports a healthy API server
    #[error("Leader not elected, quorum is most likely lost")]
    QuorumLost,

    /// An operation was invoked in a state it does not support
    #[error("Invariant violated: {0}")]
    InvariantError(String),

    /// etcd member list or status query failed
    #[error("etcd error: {0}")]
    EtcdError(String),

    /// A probe task panicked or was cancelled
    #[error("Probe task failed: {0}")]
    TaskFailed(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// HTTP request to a control-plane endpoint failed
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Local I/O failure (reading manifests, spawning ssh)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// Returns true for failures of the remote transport rather than of a command
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::ConnectionError { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
