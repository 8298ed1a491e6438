//! microVM lifecycle management on top of containerd and the Firecracker
//! runtime shim.
//!
//! [`VmOrchestrator`] launches, stops and lists VMs through a
//! [`ContainerRuntime`]; [`RemoteShell`] waits for a booted guest to accept
//! ssh and runs commands on it.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod cancel;
pub mod ctr;
pub mod error;
pub mod key;
pub mod orchestrator;
pub mod poll;
pub mod remote;
pub mod runtime;

pub use cancel::CancelToken;
pub use ctr::CtrRuntime;
pub use error::{ExecutorError, ResourceKind};
pub use orchestrator::{OrchestratorSettings, VmOrchestrator, VmPhase};
pub use poll::{poll_until, PollError};
pub use remote::RemoteShell;
pub use runtime::{ContainerRuntime, Signal, TaskStatus, WorkloadInfo, WorkloadSpec};
