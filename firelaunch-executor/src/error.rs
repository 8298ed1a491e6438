//! Error types for the executor crate.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use firelaunch_core::CoreError;

/// What kind of object a [`ExecutorError::ResourceNotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResourceKind {
    /// Kernel or rootfs image on the host.
    HostFile,
    /// Runtime workload (container).
    Workload,
    /// Execution task bound to a workload.
    Task,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HostFile => "host file",
            Self::Workload => "workload",
            Self::Task => "task",
        })
    }
}

/// Errors that can occur during VM lifecycle and remote shell operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ExecutorError {
    /// The VM configuration failed validation. No runtime call was made.
    #[error("invalid configuration: {0}")]
    Configuration(#[source] CoreError),

    /// A host file or runtime object does not exist.
    #[error("{kind} not found: {name}")]
    ResourceNotFound { kind: ResourceKind, name: String },

    /// A call into the container runtime failed.
    #[error("runtime call `{op}` failed: {reason}")]
    RuntimeCall { op: &'static str, reason: String },

    /// Polling exceeded its deadline.
    #[error("timed out after {}s waiting for {what}", timeout.as_secs_f64())]
    ReadinessTimeout {
        what: &'static str,
        timeout: Duration,
    },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The ssh private key could not be read or parsed.
    #[error("invalid private key {}: {reason}", path.display())]
    InvalidKey { path: PathBuf, reason: String },

    /// No ssh connection could be established.
    #[error("ssh connection to {target} failed: {reason}")]
    RemoteConnect { target: String, reason: String },

    /// A remote command ran but exited unsuccessfully.
    #[error("remote command exited with status {status}: {output}")]
    RemoteCommand { status: i32, output: String },

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for ExecutorError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::HostFileMissing { what, path, .. } => Self::ResourceNotFound {
                kind: ResourceKind::HostFile,
                name: format!("{what} at {}", path.display()),
            },
            other => Self::Configuration(other),
        }
    }
}
