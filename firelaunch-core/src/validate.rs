//! Launch preconditions.
//!
//! Checks run in a fixed order and stop at the first failure. The host-file
//! checks are part of validation: a workload created against a missing
//! kernel or rootfs fails deep inside the runtime with a far less useful
//! error.

use std::path::Path;

use crate::config::{HostPaths, VmConfig};
use crate::error::CoreError;

/// Smallest memory size a guest can boot with, in mebibytes.
pub const MIN_MEMORY_MIB: u64 = 128;

/// Smallest vCPU count.
pub const MIN_CPUS: u32 = 1;

/// Validate a VM configuration against the host it will run on.
///
/// # Errors
/// Returns [`CoreError::InvalidConfig`] for a malformed configuration and
/// [`CoreError::HostFileMissing`] if the kernel or rootfs image is absent.
pub fn validate_config(config: &VmConfig, host: &HostPaths) -> Result<(), CoreError> {
    validate_shape(config)?;
    require_host_file("kernel image", &host.kernel)?;
    require_host_file("root filesystem image", &host.rootfs)?;
    Ok(())
}

/// Shape-only checks that never touch the filesystem.
///
/// # Errors
/// Returns [`CoreError::InvalidConfig`] naming the first offending field.
pub fn validate_shape(config: &VmConfig) -> Result<(), CoreError> {
    if config.id.is_empty() {
        return Err(invalid("id", "VM ID cannot be empty"));
    }
    if config.memory_mb < MIN_MEMORY_MIB {
        let (min, got) = (MIN_MEMORY_MIB, config.memory_mb);
        return Err(invalid(
            "memory_mb",
            format!("VM memory must be at least {min}MB, got {got}MB"),
        ));
    }
    if config.cpus < MIN_CPUS {
        return Err(invalid("cpus", "VM must have at least 1 CPU"));
    }
    if config.kernel.is_empty() {
        return Err(invalid("kernel", "kernel path cannot be empty"));
    }
    Ok(())
}

fn invalid(field: &'static str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidConfig {
        field,
        reason: reason.into(),
    }
}

fn require_host_file(what: &'static str, path: &Path) -> Result<(), CoreError> {
    std::fs::metadata(path)
        .map(|_| ())
        .map_err(|source| CoreError::HostFileMissing {
            what,
            path: path.to_owned(),
            source,
        })
}
