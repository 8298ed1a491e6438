//! Container-runtime abstraction.
//!
//! The orchestrator never talks to containerd or the Firecracker shim
//! directly; it drives a [`ContainerRuntime`]. Production code uses
//! [`CtrRuntime`](crate::CtrRuntime), tests use an in-memory fake.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ExecutorError;

/// Execution status of a task as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Pausing,
    Stopped,
    Unknown,
}

impl TaskStatus {
    /// Parse the runtime's status word, case-insensitively.
    #[must_use]
    pub fn from_runtime(word: &str) -> Self {
        match word.to_ascii_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "pausing" => Self::Pausing,
            "stopped" => Self::Stopped,
            _ => Self::Unknown,
        }
    }

    /// Returns `true` once the task process has exited.
    #[must_use]
    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Pausing => "pausing",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        })
    }
}

/// Signal delivered to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Graceful termination.
    Term,
    /// Forceful termination.
    Kill,
}

impl Signal {
    /// Conventional signal name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Term => "SIGTERM",
            Self::Kill => "SIGKILL",
        }
    }
}

/// Everything the runtime needs to create a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Workload identity, equal to the VM identity.
    pub id: String,
    /// Image the workload snapshot is prepared from.
    pub image: String,
    /// Runtime handler the workload is bound to.
    pub runtime_handler: String,
    /// Snapshotter holding the image layers.
    pub snapshotter: String,
    /// Annotations attached to the generated runtime spec.
    pub annotations: BTreeMap<String, String>,
}

/// Metadata of an existing workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadInfo {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Annotations found on the workload's runtime spec.
    pub annotations: BTreeMap<String, String>,
}

/// Operations the orchestrator consumes from the container runtime.
///
/// Every call is scoped to the implementation's namespace. Implementations
/// must be `Send + Sync` to allow use across async tasks.
///
/// A missing workload or task is reported as
/// [`ExecutorError::ResourceNotFound`]; any other failure as
/// [`ExecutorError::RuntimeCall`].
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull `image` and unpack it into `snapshotter`.
    async fn pull_image(&self, image: &str, snapshotter: &str) -> Result<(), ExecutorError>;

    /// Create a workload with a fresh snapshot of its image.
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ExecutorError>;

    /// Load an existing workload's metadata.
    async fn load_workload(&self, id: &str) -> Result<WorkloadInfo, ExecutorError>;

    /// Identities of every workload in the namespace.
    async fn list_workloads(&self) -> Result<Vec<String>, ExecutorError>;

    /// Delete a workload together with its snapshot.
    async fn delete_workload(&self, id: &str) -> Result<(), ExecutorError>;

    /// Create the execution task for a workload.
    async fn create_task(&self, id: &str) -> Result<(), ExecutorError>;

    /// Start a created task detached, sending its console to a log file.
    async fn start_task(&self, id: &str) -> Result<(), ExecutorError>;

    /// Current status of a workload's task.
    async fn task_status(&self, id: &str) -> Result<TaskStatus, ExecutorError>;

    /// Deliver `signal` to a workload's task.
    async fn kill_task(&self, id: &str, signal: Signal) -> Result<(), ExecutorError>;

    /// Delete a workload's task; `force` kills a live process first.
    async fn delete_task(&self, id: &str, force: bool) -> Result<(), ExecutorError>;
}
