//! Error types for the command-line front end.

use firelaunch_core::CoreError;
use firelaunch_executor::ExecutorError;

/// Errors surfaced to the user by the `firelaunch` binary.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CliError {
    /// The configuration file could not be loaded.
    #[error(transparent)]
    Config(#[from] CoreError),

    /// A lifecycle or remote shell operation failed.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The guest address needed for ssh is not configured.
    #[error("vm.ip is not set; cannot reach the guest over ssh")]
    MissingGuestAddress,

    /// Output could not be encoded.
    #[error("failed to encode output: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Whether the failure was the user interrupting the command.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Executor(ExecutorError::Cancelled))
    }
}
