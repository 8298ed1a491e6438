//! Launcher configuration document.
//!
//! The document is YAML with a `vm` and an `ssh` section; the `runtime` and
//! `host` sections are optional and fall back to the defaults below.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::VmId;

/// Default containerd socket.
pub const DEFAULT_RUNTIME_ADDRESS: &str = "/run/containerd/containerd.sock";

/// Namespace every runtime call is scoped to.
pub const DEFAULT_NAMESPACE: &str = "firecracker";

/// Runtime handler that hands the workload to the Firecracker shim.
pub const DEFAULT_RUNTIME_HANDLER: &str = "io.containerd.runtime.v2.aws-firecracker";

/// Snapshotter the image is unpacked into.
pub const DEFAULT_SNAPSHOTTER: &str = "overlayfs";

/// Kernel image the shim boots.
pub const DEFAULT_KERNEL_PATH: &str = "/var/lib/firecracker-containerd/kernel/vmlinux";

/// Root filesystem image attached as the root drive.
pub const DEFAULT_ROOTFS_PATH: &str = "/var/lib/firecracker/rootfs/rootfs.ext4";

/// Directory receiving one `<id>.log` file of guest console output per VM.
pub const DEFAULT_CONSOLE_LOG_DIR: &str = "/var/log/firelaunch";

/// Declarative description of a single microVM.
///
/// Read-only to the orchestrator for the duration of a launch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmConfig {
    /// VM identity; also names the workload and the tap device.
    #[serde(default)]
    pub id: VmId,

    /// Image reference pulled into the snapshotter.
    #[serde(default)]
    pub image: String,

    /// Kernel reference requested by the operator.
    #[serde(default)]
    pub kernel: String,

    /// Number of virtual CPUs.
    #[serde(default)]
    pub cpus: u32,

    /// Memory size in mebibytes.
    #[serde(default)]
    pub memory_mb: u64,

    /// Static guest IPv4 address.
    #[serde(default)]
    pub ip: String,

    /// Default gateway for the guest.
    #[serde(default)]
    pub gateway: String,

    /// Netmask for `ip`, dotted-quad form.
    #[serde(default)]
    pub netmask: String,

    /// Guest NIC MAC address.
    #[serde(default)]
    pub mac_address: String,

    /// DNS servers handed to the guest.
    #[serde(default)]
    pub nameservers: Vec<String>,
}

/// Credentials used to reach a booted guest over ssh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    pub user: String,
    pub key_path: PathBuf,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

fn default_ssh_port() -> u16 {
    22
}

/// Where and how the container runtime is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// containerd socket path.
    pub address: PathBuf,
    /// Namespace all calls are scoped to.
    pub namespace: String,
    /// Runtime handler bound to every workload.
    pub runtime_handler: String,
    /// Snapshotter used for pull and workload creation.
    pub snapshotter: String,
    /// `ctr` binary, absolute or looked up in `$PATH`.
    pub ctr_binary: PathBuf,
    /// Where the guest console of each task is written.
    pub console_log_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            address: PathBuf::from(DEFAULT_RUNTIME_ADDRESS),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            runtime_handler: DEFAULT_RUNTIME_HANDLER.to_owned(),
            snapshotter: DEFAULT_SNAPSHOTTER.to_owned(),
            ctr_binary: PathBuf::from("ctr"),
            console_log_dir: PathBuf::from(DEFAULT_CONSOLE_LOG_DIR),
        }
    }
}

/// Well-known host paths of the boot artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPaths {
    pub kernel: PathBuf,
    pub rootfs: PathBuf,
}

impl HostPaths {
    /// Create host paths pointing at explicit artifacts.
    #[must_use]
    pub fn new(kernel: PathBuf, rootfs: PathBuf) -> Self {
        Self { kernel, rootfs }
    }
}

impl Default for HostPaths {
    fn default() -> Self {
        Self::new(
            PathBuf::from(DEFAULT_KERNEL_PATH),
            PathBuf::from(DEFAULT_ROOTFS_PATH),
        )
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherConfig {
    pub vm: VmConfig,
    pub ssh: SshConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub host: HostPaths,
}

impl LauncherConfig {
    /// Read and parse a configuration file.
    ///
    /// # Errors
    /// Returns [`CoreError::ConfigLoad`] if the file cannot be read or is not
    /// a valid document.
    pub fn from_path(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| CoreError::ConfigLoad {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|reason| CoreError::ConfigLoad {
            path: path.to_owned(),
            reason,
        })
    }

    /// Parse a configuration document held in memory.
    ///
    /// # Errors
    /// Returns [`CoreError::ConfigLoad`] if the text is not a valid document.
    pub fn from_yaml_str(text: &str) -> Result<Self, CoreError> {
        Self::parse(text).map_err(|reason| CoreError::ConfigLoad {
            path: PathBuf::from("<inline>"),
            reason,
        })
    }

    fn parse(text: &str) -> Result<Self, String> {
        serde_yaml::from_str(text).map_err(|e| e.to_string())
    }
}
