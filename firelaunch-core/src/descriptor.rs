//! Launch descriptor for the Firecracker runtime shim.
//!
//! The shim learns VM parameters from exactly one place: a JSON blob stored
//! as an annotation on the workload spec. There is no side channel to the
//! hypervisor, so everything the guest needs (kernel, sizing, static
//! addressing, tap device, root drive) has to be in the blob.
//!
//! Addressing is always static. Nothing on the host answers DHCP, so the
//! guest learns its address from the `ip=` kernel parameter.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::{HostPaths, VmConfig};
use crate::error::CoreError;

/// Annotation key carrying the VM identity.
pub const VM_ID_ANNOTATION: &str = "aws.firecracker.vm.id";

/// Annotation key carrying the serialized [`VmAnnotation`].
pub const VM_CONFIG_ANNOTATION: &str = "aws.firecracker.vm.config";

/// Prefix of every host tap device.
pub const TAP_PREFIX: &str = "tap";

/// Host-side device the tap is bridged to.
pub const HOST_DEV_NAME: &str = "eth0";

/// Guest interface the static address is bound to.
pub const GUEST_IFACE: &str = "eth0";

/// Block device backing the guest root filesystem.
pub const ROOT_DEVICE: &str = "/dev/vda";

/// MTU of the tap device.
pub const DEFAULT_MTU: u32 = 1500;

const BOOT_FLAGS: &str = "console=ttyS0 noapic reboot=k panic=1 pci=off nomodules rw";
const SYSTEMD_FLAGS: &str =
    "systemd.unified_cgroup_hierarchy=0 systemd.journald.forward_to_console=1";

/// Network parameters for the guest NIC and its host tap device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescriptor {
    pub tap_name: String,
    pub host_dev_name: String,
    pub mac_address: String,
    pub ip_address: String,
    pub gateway: String,
    pub nameservers: Vec<String>,
    pub mtu: u32,
    pub allow_mmds_requests: bool,
}

/// A block device attached to the guest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveDescriptor {
    pub is_root_device: bool,
    pub path_on_host: PathBuf,
    pub is_read_only: bool,
}

/// The blob stored under [`VM_CONFIG_ANNOTATION`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmAnnotation {
    pub kernel: PathBuf,
    pub cpu_count: u32,
    pub memory_in_bytes: u64,
    pub kernel_args: String,
    pub network: NetworkDescriptor,
    pub drives: Vec<DriveDescriptor>,
}

impl VmAnnotation {
    /// Decode a blob previously produced by [`build_launch_spec`].
    ///
    /// # Errors
    /// Returns [`CoreError::Encode`] if the text is not a valid blob.
    pub fn parse(text: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Everything derived from a [`VmConfig`] for one launch. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub network: NetworkDescriptor,
    pub root_drive: DriveDescriptor,
    pub kernel_args: String,
    /// Serialized [`VmAnnotation`].
    pub annotation: String,
    /// Annotations to attach to the workload spec, keyed by annotation name.
    pub annotations: BTreeMap<String, String>,
}

/// Deterministic tap device name for a VM.
#[must_use]
pub fn tap_device_name(config: &VmConfig) -> String {
    format!("{TAP_PREFIX}{}", config.id)
}

/// Kernel command line with the static `ip=` triplet and root device.
#[must_use]
pub fn kernel_args(config: &VmConfig) -> String {
    format!(
        "{BOOT_FLAGS} ip={ip}::{gw}:{mask}::{GUEST_IFACE}:off root={ROOT_DEVICE} {SYSTEMD_FLAGS}",
        ip = config.ip,
        gw = config.gateway,
        mask = config.netmask,
    )
}

/// Build the launch descriptor for `config`.
///
/// Pure: identical inputs produce byte-identical output.
///
/// # Errors
/// Returns [`CoreError::InvalidConfig`] if `memory_mb` does not fit in a
/// byte count, or [`CoreError::Encode`] if the annotation cannot be
/// serialized (for example a host path that is not valid UTF-8).
pub fn build_launch_spec(config: &VmConfig, host: &HostPaths) -> Result<LaunchSpec, CoreError> {
    let memory_in_bytes = config
        .memory_mb
        .checked_mul(1024 * 1024)
        .ok_or_else(|| CoreError::InvalidConfig {
            field: "memory_mb",
            reason: format!("{} MiB overflows the byte count", config.memory_mb),
        })?;

    let network = NetworkDescriptor {
        tap_name: tap_device_name(config),
        host_dev_name: HOST_DEV_NAME.to_owned(),
        mac_address: config.mac_address.clone(),
        ip_address: config.ip.clone(),
        gateway: config.gateway.clone(),
        nameservers: config.nameservers.clone(),
        mtu: DEFAULT_MTU,
        allow_mmds_requests: true,
    };
    let root_drive = DriveDescriptor {
        is_root_device: true,
        path_on_host: host.rootfs.clone(),
        is_read_only: false,
    };
    let kernel_args = kernel_args(config);

    let blob = VmAnnotation {
        kernel: host.kernel.clone(),
        cpu_count: config.cpus,
        memory_in_bytes,
        kernel_args: kernel_args.clone(),
        network: network.clone(),
        drives: vec![root_drive.clone()],
    };
    let annotation = serde_json::to_string(&blob)?;

    let annotations = BTreeMap::from([
        (VM_ID_ANNOTATION.to_owned(), config.id.to_string()),
        (VM_CONFIG_ANNOTATION.to_owned(), annotation.clone()),
    ]);

    Ok(LaunchSpec {
        network,
        root_drive,
        kernel_args,
        annotation,
        annotations,
    })
}
