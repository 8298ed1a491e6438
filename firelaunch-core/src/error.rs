use std::path::PathBuf;

/// Errors produced by the `firelaunch-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A configuration field failed validation.
    #[error("invalid configuration field '{field}': {reason}")]
    InvalidConfig {
        /// Document key of the offending field.
        field: &'static str,
        reason: String,
    },

    /// A host-side file the VM boots from does not exist.
    #[error("{what} not found at {}", path.display())]
    HostFileMissing {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration document could not be read or parsed.
    #[error("failed to load configuration from {}: {reason}", path.display())]
    ConfigLoad { path: PathBuf, reason: String },

    /// The hypervisor annotation blob could not be serialized.
    #[error("failed to encode VM annotation: {0}")]
    Encode(#[from] serde_json::Error),
}
