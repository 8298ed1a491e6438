//! Core types for firelaunch microVM launches.
//!
//! Holds the configuration document, the launch preconditions, and the
//! descriptor handed to the Firecracker runtime shim. Nothing in this crate
//! talks to the container runtime.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod config;
pub mod descriptor;
pub mod error;
pub mod id;
pub mod state;
pub mod validate;

pub use config::{HostPaths, LauncherConfig, RuntimeConfig, SshConfig, VmConfig};
pub use descriptor::{build_launch_spec, kernel_args, tap_device_name};
pub use descriptor::{DriveDescriptor, LaunchSpec, NetworkDescriptor, VmAnnotation};
pub use error::CoreError;
pub use id::VmId;
pub use state::{VmState, STATUS_RUNNING};
pub use validate::{validate_config, validate_shape};
