//! microVM lifecycle orchestration over a [`ContainerRuntime`].
//!
//! A launch walks `Created -> Started -> AwaitingReady -> Running`; a stop
//! walks `Running -> Stopping -> Stopped`. Any failure after the workload
//! exists rolls back exactly what was created so far before the error is
//! returned. The runtime is the only source of truth: nothing about running
//! VMs is cached here.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use firelaunch_core::descriptor::{VmAnnotation, VM_CONFIG_ANNOTATION};
use firelaunch_core::{
    build_launch_spec, validate_config, HostPaths, RuntimeConfig, VmConfig, VmId, VmState,
    STATUS_RUNNING,
};

use crate::cancel::CancelToken;
use crate::poll::{poll_until, PollError};
use crate::runtime::{ContainerRuntime, Signal, TaskStatus, WorkloadSpec};
use crate::ExecutorError;

/// Interval between task status queries while awaiting readiness.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a started task may take to report running.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between task status queries while waiting for a graceful exit.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long a task may take to exit after SIGTERM before it is killed.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on each individual cleanup call.
const CLEANUP_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Lifecycle phase of a VM, used for transition logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmPhase {
    Created,
    Started,
    AwaitingReady,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for VmPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::AwaitingReady => "awaiting-ready",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

/// Tunables for a [`VmOrchestrator`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Runtime handler every workload is bound to.
    pub runtime_handler: String,
    /// Snapshotter images are pulled into.
    pub snapshotter: String,
    /// Host kernel and rootfs checked before launch.
    pub host: HostPaths,
    pub ready_poll_interval: Duration,
    pub ready_timeout: Duration,
    pub stop_poll_interval: Duration,
    pub stop_timeout: Duration,
}

impl OrchestratorSettings {
    /// Settings for `runtime` with the default timeouts.
    #[must_use]
    pub fn new(runtime: &RuntimeConfig, host: HostPaths) -> Self {
        Self {
            runtime_handler: runtime.runtime_handler.clone(),
            snapshotter: runtime.snapshotter.clone(),
            host,
            ready_poll_interval: READY_POLL_INTERVAL,
            ready_timeout: READY_TIMEOUT,
            stop_poll_interval: STOP_POLL_INTERVAL,
            stop_timeout: STOP_TIMEOUT,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::new(&RuntimeConfig::default(), HostPaths::default())
    }
}

/// A workload this orchestrator created or loaded.
#[derive(Debug)]
struct Workload {
    id: String,
}

/// The task bound to a [`Workload`].
///
/// Borrowing the workload means a task can never outlive it, so the
/// workload cannot be deleted while a task handle is still around.
#[derive(Debug)]
struct Task<'w> {
    workload: &'w Workload,
    /// SIGKILL already delivered; cleanup must not send another.
    kill_sent: bool,
}

impl<'w> Task<'w> {
    fn new(workload: &'w Workload) -> Self {
        Self {
            workload,
            kill_sent: false,
        }
    }

    fn id(&self) -> &str {
        &self.workload.id
    }
}

/// Launches, stops and enumerates microVMs.
///
/// Holds no per-VM state, so launches of different identities may run
/// concurrently. Launch and stop of the same identity must be serialized by
/// the caller.
pub struct VmOrchestrator<R: ContainerRuntime> {
    runtime: R,
    settings: OrchestratorSettings,
}

impl<R: ContainerRuntime> VmOrchestrator<R> {
    /// Create an orchestrator over `runtime`.
    #[must_use]
    pub fn new(runtime: R, settings: OrchestratorSettings) -> Self {
        Self { runtime, settings }
    }

    /// The underlying runtime.
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Settings this orchestrator was built with.
    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Launch a VM and wait until its task reports running.
    ///
    /// Returns the VM identity only once the runtime has confirmed the task
    /// is running. On any failure after the workload was created, the task
    /// and workload are rolled back before the error is returned.
    ///
    /// # Errors
    /// - [`ExecutorError::Configuration`] if validation fails; no runtime
    ///   call is made.
    /// - [`ExecutorError::ResourceNotFound`] if the kernel or rootfs image is
    ///   missing on the host.
    /// - [`ExecutorError::RuntimeCall`] if pull, create or start fails.
    /// - [`ExecutorError::ReadinessTimeout`] if the task is not running in
    ///   time, or [`ExecutorError::Cancelled`] if `cancel` fires first.
    pub async fn launch(
        &self,
        config: &VmConfig,
        cancel: &CancelToken,
    ) -> Result<VmId, ExecutorError> {
        validate_config(config, &self.settings.host)?;
        let launch = build_launch_spec(config, &self.settings.host)?;
        let id = config.id.as_str();

        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ExecutorError::Cancelled),
            pulled = self.runtime.pull_image(&config.image, &self.settings.snapshotter) => pulled?,
        }

        let spec = WorkloadSpec {
            id: id.to_owned(),
            image: config.image.clone(),
            runtime_handler: self.settings.runtime_handler.clone(),
            snapshotter: self.settings.snapshotter.clone(),
            annotations: launch.annotations,
        };
        self.runtime.create_workload(&spec).await?;
        let workload = Workload { id: id.to_owned() };
        enter(id, VmPhase::Created);

        if let Err(e) = self.runtime.create_task(id).await {
            return Err(self.fail(e, None, Some(&workload)).await);
        }
        let task = Task::new(&workload);

        if let Err(e) = self.runtime.start_task(id).await {
            return Err(self.fail(e, Some(task), Some(&workload)).await);
        }
        enter(id, VmPhase::Started);

        enter(id, VmPhase::AwaitingReady);
        if let Err(e) = self.await_running(id, cancel).await {
            return Err(self.fail(e, Some(task), Some(&workload)).await);
        }
        enter(id, VmPhase::Running);

        tracing::info!(
            vm_id = %config.id,
            ip = %config.ip,
            cpus = config.cpus,
            memory_mb = config.memory_mb,
            kernel = %config.kernel,
            image = %config.image,
            mac_address = %config.mac_address,
            nameservers = ?config.nameservers,
            tap = %launch.network.tap_name,
            "VM launched successfully"
        );

        Ok(config.id.clone())
    }

    /// Stop a VM: SIGTERM, wait for exit, SIGKILL on timeout, then delete the
    /// task and the workload with its snapshot.
    ///
    /// # Errors
    /// - [`ExecutorError::ResourceNotFound`] if no workload has this identity.
    /// - [`ExecutorError::RuntimeCall`] if the workload or task cannot be
    ///   inspected.
    /// - [`ExecutorError::Cancelled`] if `cancel` fires while waiting; the VM
    ///   is still killed and removed.
    pub async fn stop(&self, id: &str, cancel: &CancelToken) -> Result<(), ExecutorError> {
        let info = self.runtime.load_workload(id).await?;
        let workload = Workload { id: info.id };
        enter(id, VmPhase::Stopping);

        let status = match self.runtime.task_status(id).await {
            Ok(status) => status,
            Err(ExecutorError::ResourceNotFound { .. }) => {
                tracing::warn!(vm_id = %id, "workload has no task; removing workload only");
                self.cleanup(None, Some(&workload)).await;
                enter(id, VmPhase::Stopped);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut task = Task::new(&workload);
        let mut outcome = Ok(());

        if !status.is_stopped() {
            let graceful = match self.runtime.kill_task(id, Signal::Term).await {
                Ok(()) => self.await_exit(id, cancel).await,
                Err(e) => {
                    tracing::warn!(
                        vm_id = %id,
                        error = %e,
                        "failed to send SIGTERM, attempting force kill"
                    );
                    Err(PollError::TimedOut)
                }
            };

            match graceful {
                Ok(()) => tracing::debug!(vm_id = %id, "task exited gracefully"),
                Err(PollError::Cancelled) => {
                    outcome = Err(ExecutorError::Cancelled);
                    self.escalate(&mut task).await;
                }
                Err(PollError::TimedOut) => self.escalate(&mut task).await,
                Err(PollError::Check(e)) => {
                    tracing::warn!(vm_id = %id, error = %e, "lost track of task while stopping");
                    self.escalate(&mut task).await;
                }
            }
        }

        self.cleanup(Some(task), Some(&workload)).await;

        match &outcome {
            Ok(()) => {
                enter(id, VmPhase::Stopped);
                tracing::info!(vm_id = %id, "VM stopped successfully");
            }
            Err(_) => enter(id, VmPhase::Failed),
        }
        outcome
    }

    /// List every VM the runtime knows about.
    ///
    /// Workloads whose metadata cannot be read are skipped rather than
    /// failing the whole listing.
    ///
    /// # Errors
    /// Returns [`ExecutorError::RuntimeCall`] if the workloads cannot be
    /// enumerated, or [`ExecutorError::Cancelled`].
    pub async fn list(&self, cancel: &CancelToken) -> Result<Vec<VmState>, ExecutorError> {
        let ids = self.runtime.list_workloads().await?;
        let mut vms = Vec::with_capacity(ids.len());

        for id in ids {
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }
            let info = match self.runtime.load_workload(&id).await {
                Ok(info) => info,
                Err(e) => {
                    tracing::debug!(vm_id = %id, error = %e, "skipping workload without metadata");
                    continue;
                }
            };
            let ip = info
                .annotations
                .get(VM_CONFIG_ANNOTATION)
                .and_then(|blob| VmAnnotation::parse(blob).ok())
                .map(|blob| blob.network.ip_address)
                .filter(|ip| !ip.is_empty());

            vms.push(VmState {
                id: VmId::new(info.id),
                ip,
                created_at: info.created_at,
                status: STATUS_RUNNING.to_owned(),
            });
        }

        Ok(vms)
    }

    async fn await_running(&self, id: &str, cancel: &CancelToken) -> Result<(), ExecutorError> {
        let (interval, timeout) = (self.settings.ready_poll_interval, self.settings.ready_timeout);
        let polled = poll_until(interval, timeout, cancel, || async move {
            match self.runtime.task_status(id).await? {
                TaskStatus::Running => Ok(Some(())),
                TaskStatus::Stopped => Err(ExecutorError::RuntimeCall {
                    op: "await ready",
                    reason: "task exited before reporting running".to_owned(),
                }),
                _ => Ok(None),
            }
        })
        .await;

        polled.map_err(|e| match e {
            PollError::TimedOut => ExecutorError::ReadinessTimeout {
                what: "task to report running",
                timeout,
            },
            PollError::Cancelled => ExecutorError::Cancelled,
            PollError::Check(e) => e,
        })
    }

    async fn await_exit(
        &self,
        id: &str,
        cancel: &CancelToken,
    ) -> Result<(), PollError<ExecutorError>> {
        let (interval, timeout) = (self.settings.stop_poll_interval, self.settings.stop_timeout);
        poll_until(interval, timeout, cancel, || async move {
            match self.runtime.task_status(id).await {
                Ok(status) => Ok(status.is_stopped().then_some(())),
                Err(ExecutorError::ResourceNotFound { .. }) => Ok(Some(())),
                Err(e) => Err(e),
            }
        })
        .await
    }

    async fn escalate(&self, task: &mut Task<'_>) {
        let id = task.id().to_owned();
        tracing::warn!(vm_id = %id, "task did not exit in time, sending SIGKILL");
        task.kill_sent = true;
        if let Err(e) = self.runtime.kill_task(&id, Signal::Kill).await {
            tracing::error!(vm_id = %id, error = %e, "failed to force kill task");
        }
    }

    /// Roll back and hand the triggering error back to the caller.
    async fn fail(
        &self,
        err: ExecutorError,
        task: Option<Task<'_>>,
        workload: Option<&Workload>,
    ) -> ExecutorError {
        if let Some(w) = workload {
            tracing::warn!(vm_id = %w.id, error = %err, "launch failed, rolling back");
            enter(&w.id, VmPhase::Failed);
        }
        self.cleanup(task, workload).await;
        err
    }

    /// Release whatever exists of a task/workload pair, task first.
    ///
    /// Idempotent and best-effort: failures are logged and never returned,
    /// and each call is bounded so a hung runtime cannot block the caller.
    async fn cleanup(&self, task: Option<Task<'_>>, workload: Option<&Workload>) {
        if let Some(task) = task {
            let id = task.id();
            if !task.kill_sent {
                let status = cleanup_step(id, "task status", self.runtime.task_status(id)).await;
                if matches!(status, Some(s) if !s.is_stopped()) {
                    cleanup_step(id, "kill task", self.runtime.kill_task(id, Signal::Kill)).await;
                }
            }
            cleanup_step(id, "delete task", self.runtime.delete_task(id, true)).await;
        }

        if let Some(workload) = workload {
            let id = workload.id.as_str();
            cleanup_step(id, "delete workload", self.runtime.delete_workload(id)).await;
        }
    }
}

async fn cleanup_step<T>(
    vm_id: &str,
    step: &'static str,
    call: impl Future<Output = Result<T, ExecutorError>>,
) -> Option<T> {
    match tokio::time::timeout(CLEANUP_STEP_TIMEOUT, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(ExecutorError::ResourceNotFound { .. })) => {
            tracing::debug!(%vm_id, step, "already gone");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(%vm_id, step, error = %e, "cleanup step failed");
            None
        }
        Err(_) => {
            tracing::warn!(
                %vm_id,
                step,
                timeout_s = CLEANUP_STEP_TIMEOUT.as_secs(),
                "cleanup step timed out"
            );
            None
        }
    }
}

fn enter(vm_id: &str, phase: VmPhase) {
    tracing::debug!(%vm_id, %phase, "lifecycle transition");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::runtime::WorkloadInfo;

    /// Fails every call and counts how many were made.
    #[derive(Default)]
    struct AlwaysFailRuntime {
        calls: AtomicUsize,
    }

    impl AlwaysFailRuntime {
        fn fail<T>(&self, op: &'static str) -> Result<T, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExecutorError::RuntimeCall {
                op,
                reason: "mock always fails".to_owned(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ContainerRuntime for AlwaysFailRuntime {
        async fn pull_image(&self, _image: &str, _snapshotter: &str) -> Result<(), ExecutorError> {
            self.fail("pull image")
        }
        async fn create_workload(&self, _spec: &WorkloadSpec) -> Result<(), ExecutorError> {
            self.fail("create workload")
        }
        async fn load_workload(&self, id: &str) -> Result<WorkloadInfo, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExecutorError::ResourceNotFound {
                kind: crate::error::ResourceKind::Workload,
                name: id.to_owned(),
            })
        }
        async fn list_workloads(&self) -> Result<Vec<String>, ExecutorError> {
            self.fail("list workloads")
        }
        async fn delete_workload(&self, _id: &str) -> Result<(), ExecutorError> {
            self.fail("delete workload")
        }
        async fn create_task(&self, _id: &str) -> Result<(), ExecutorError> {
            self.fail("create task")
        }
        async fn start_task(&self, _id: &str) -> Result<(), ExecutorError> {
            self.fail("start task")
        }
        async fn task_status(&self, _id: &str) -> Result<TaskStatus, ExecutorError> {
            self.fail("task status")
        }
        async fn kill_task(&self, _id: &str, _signal: Signal) -> Result<(), ExecutorError> {
            self.fail("kill task")
        }
        async fn delete_task(&self, _id: &str, _force: bool) -> Result<(), ExecutorError> {
            self.fail("delete task")
        }
    }

    fn config() -> VmConfig {
        VmConfig {
            id: VmId::new("vm1"),
            image: "docker.io/library/alpine:3.19".to_owned(),
            kernel: "/k".to_owned(),
            cpus: 2,
            memory_mb: 512,
            ..VmConfig::default()
        }
    }

    fn orchestrator() -> VmOrchestrator<AlwaysFailRuntime> {
        let settings = OrchestratorSettings::default();
        VmOrchestrator::new(AlwaysFailRuntime::default(), settings)
    }

    #[tokio::test]
    async fn invalid_config_makes_no_runtime_calls() {
        let orch = orchestrator();
        let mut no_id = config();
        no_id.id = VmId::new("");
        let mut small = config();
        small.memory_mb = 64;
        let mut no_cpus = config();
        no_cpus.cpus = 0;
        let mut no_kernel = config();
        no_kernel.kernel = String::new();

        for bad in [no_id, small, no_cpus, no_kernel] {
            let result = orch.launch(&bad, &CancelToken::new()).await;
            assert!(
                matches!(result, Err(ExecutorError::Configuration(_))),
                "expected Configuration, got {result:?}"
            );
        }
        assert_eq!(
            orch.runtime().calls(),
            0,
            "validation must precede every runtime call"
        );
    }

    #[tokio::test]
    async fn missing_host_files_report_resource_not_found() {
        let host = HostPaths::new("/nonexistent/vmlinux".into(), "/nonexistent/rootfs".into());
        let settings = OrchestratorSettings {
            host,
            ..OrchestratorSettings::default()
        };
        let orch = VmOrchestrator::new(AlwaysFailRuntime::default(), settings);
        let result = orch.launch(&config(), &CancelToken::new()).await;
        assert!(
            matches!(result, Err(ExecutorError::ResourceNotFound { .. })),
            "got {result:?}"
        );
        assert_eq!(orch.runtime().calls(), 0);
    }

    #[tokio::test]
    async fn stop_unknown_vm_returns_not_found() {
        let orch = orchestrator();
        let result = orch.stop("ghost", &CancelToken::new()).await;
        assert!(
            matches!(result, Err(ExecutorError::ResourceNotFound { .. })),
            "got {result:?}"
        );
    }

    #[tokio::test]
    async fn list_propagates_enumeration_failure() {
        let orch = orchestrator();
        let result = orch.list(&CancelToken::new()).await;
        assert!(matches!(
            result,
            Err(ExecutorError::RuntimeCall {
                op: "list workloads",
                ..
            })
        ));
    }

    #[test]
    fn phase_display_is_kebab_case() {
        assert_eq!(VmPhase::AwaitingReady.to_string(), "awaiting-ready");
        assert_eq!(VmPhase::Failed.to_string(), "failed");
    }
}
