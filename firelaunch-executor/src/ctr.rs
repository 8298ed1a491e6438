//! [`ContainerRuntime`] backed by containerd's `ctr` client.
//!
//! Every call spawns `ctr --address <socket> --namespace <ns> ...` and maps
//! its exit status and stderr onto [`ExecutorError`]. `ctr` ends the message
//! for a missing object with `: not found`; calls that address a single
//! workload or task turn that into [`ExecutorError::ResourceNotFound`].
//!
//! `ctr` has no separate task-create verb: `tasks start` creates and starts
//! in one call. [`CtrRuntime::create_task`] therefore only checks that the
//! workload has no task yet, and [`CtrRuntime::start_task`] does the rest.
//! Tasks are started detached because the launcher exits long before the
//! guest does; the guest console goes to a per-VM log file instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;

use firelaunch_core::config::DEFAULT_CONSOLE_LOG_DIR;
use firelaunch_core::RuntimeConfig;

use crate::error::ResourceKind;
use crate::runtime::{ContainerRuntime, Signal, TaskStatus, WorkloadInfo, WorkloadSpec};
use crate::ExecutorError;

/// Drives containerd through the `ctr` binary.
#[derive(Debug, Clone)]
pub struct CtrRuntime {
    binary: PathBuf,
    address: PathBuf,
    namespace: String,
    console_log_dir: PathBuf,
}

/// Failure of a single `ctr` invocation, before it is tied to an operation.
#[derive(Debug)]
enum CtrFailure {
    NotFound(String),
    Failed(String),
}

impl CtrFailure {
    /// For calls naming exactly one object of `kind`.
    fn into_error(self, op: &'static str, kind: ResourceKind, name: &str) -> ExecutorError {
        match self {
            Self::NotFound(_) => ExecutorError::ResourceNotFound {
                kind,
                name: name.to_owned(),
            },
            Self::Failed(reason) => ExecutorError::RuntimeCall { op, reason },
        }
    }

    fn into_call_error(self, op: &'static str) -> ExecutorError {
        match self {
            Self::NotFound(reason) | Self::Failed(reason) => {
                ExecutorError::RuntimeCall { op, reason }
            }
        }
    }
}

impl CtrRuntime {
    /// Create a runtime client without touching the daemon.
    #[must_use]
    pub fn new(binary: PathBuf, address: PathBuf, namespace: impl Into<String>) -> Self {
        Self {
            binary,
            address,
            namespace: namespace.into(),
            console_log_dir: PathBuf::from(DEFAULT_CONSOLE_LOG_DIR),
        }
    }

    /// Write guest console logs under `dir`.
    #[must_use]
    pub fn with_console_log_dir(mut self, dir: PathBuf) -> Self {
        self.console_log_dir = dir;
        self
    }

    /// Connect to the daemon described by `config`.
    ///
    /// # Errors
    /// Returns [`ExecutorError::RuntimeCall`] if `ctr` or the socket is
    /// missing, or the daemon does not answer a version query.
    pub async fn connect(config: &RuntimeConfig) -> Result<Self, ExecutorError> {
        let dir = &config.console_log_dir;
        let console_log_dir = std::path::absolute(dir).map_err(|e| ExecutorError::RuntimeCall {
            op: "connect",
            reason: format!("console log directory {}: {e}", dir.display()),
        })?;
        let runtime = Self::new(
            config.ctr_binary.clone(),
            config.address.clone(),
            config.namespace.clone(),
        )
        .with_console_log_dir(console_log_dir);

        if !ctr_available(&runtime.binary) {
            return Err(ExecutorError::RuntimeCall {
                op: "connect",
                reason: format!("ctr binary not found at {}", runtime.binary.display()),
            });
        }

        let socket = &runtime.address;
        tokio::fs::metadata(socket)
            .await
            .map_err(|e| ExecutorError::RuntimeCall {
                op: "connect",
                reason: format!("containerd socket {}: {e}", socket.display()),
            })?;

        runtime
            .run(&["version"])
            .await
            .map_err(|f| f.into_call_error("connect"))?;

        tracing::debug!(
            address = %runtime.address.display(),
            namespace = %runtime.namespace,
            "connected to containerd"
        );
        Ok(runtime)
    }

    /// Namespace every call is scoped to.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// File the console of VM `id` is written to once its task starts.
    #[must_use]
    pub fn console_log_path(&self, id: &str) -> PathBuf {
        self.console_log_dir.join(format!("{id}.log"))
    }

    async fn run(&self, args: &[&str]) -> Result<String, CtrFailure> {
        tracing::trace!(binary = %self.binary.display(), ?args, "ctr");

        let output = Command::new(&self.binary)
            .arg("--address")
            .arg(&self.address)
            .arg("--namespace")
            .arg(&self.namespace)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CtrFailure::Failed(format!("exec {}: {e}", self.binary.display())))?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        if stderr.to_ascii_lowercase().ends_with("not found") {
            Err(CtrFailure::NotFound(stderr))
        } else if stderr.is_empty() {
            Err(CtrFailure::Failed(format!("ctr exited with {}", output.status)))
        } else {
            Err(CtrFailure::Failed(stderr))
        }
    }
}

#[async_trait]
impl ContainerRuntime for CtrRuntime {
    async fn pull_image(&self, image: &str, snapshotter: &str) -> Result<(), ExecutorError> {
        tracing::info!(%image, %snapshotter, "pulling image");
        self.run(&["images", "pull", "--snapshotter", snapshotter, image])
            .await
            .map_err(|f| f.into_call_error("pull image"))?;
        Ok(())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<(), ExecutorError> {
        let annotations: Vec<String> = spec
            .annotations
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let mut args = vec![
            "containers",
            "create",
            "--snapshotter",
            spec.snapshotter.as_str(),
            "--runtime",
            spec.runtime_handler.as_str(),
        ];
        for annotation in &annotations {
            args.push("--annotation");
            args.push(annotation.as_str());
        }
        args.push(spec.image.as_str());
        args.push(spec.id.as_str());

        self.run(&args)
            .await
            .map_err(|f| f.into_call_error("create workload"))?;
        Ok(())
    }

    async fn load_workload(&self, id: &str) -> Result<WorkloadInfo, ExecutorError> {
        let json = self
            .run(&["containers", "info", id])
            .await
            .map_err(|f| f.into_error("load workload", ResourceKind::Workload, id))?;
        parse_workload_info(&json).map_err(|reason| ExecutorError::RuntimeCall {
            op: "load workload",
            reason,
        })
    }

    async fn list_workloads(&self) -> Result<Vec<String>, ExecutorError> {
        let out = self
            .run(&["containers", "list", "--quiet"])
            .await
            .map_err(|f| f.into_call_error("list workloads"))?;
        Ok(parse_id_list(&out))
    }

    async fn delete_workload(&self, id: &str) -> Result<(), ExecutorError> {
        // `containers delete` removes the snapshot unless --keep-snapshot is given.
        self.run(&["containers", "delete", id])
            .await
            .map_err(|f| f.into_error("delete workload", ResourceKind::Workload, id))?;
        Ok(())
    }

    async fn create_task(&self, id: &str) -> Result<(), ExecutorError> {
        match self.task_status(id).await {
            Err(ExecutorError::ResourceNotFound { .. }) => Ok(()),
            Ok(status) => Err(ExecutorError::RuntimeCall {
                op: "create task",
                reason: format!("workload {id} already has a task ({status})"),
            }),
            Err(e) => Err(e),
        }
    }

    async fn start_task(&self, id: &str) -> Result<(), ExecutorError> {
        tokio::fs::create_dir_all(&self.console_log_dir)
            .await
            .map_err(|e| ExecutorError::RuntimeCall {
                op: "start task",
                reason: format!("{}: {e}", self.console_log_dir.display()),
            })?;
        let log_path = self.console_log_path(id);
        let log_uri = format!("file://{}", log_path.display());

        // A missing image or snapshot is also reported as `not found`, so
        // this never maps to ResourceNotFound.
        self.run(&["tasks", "start", "--detach", "--log-uri", &log_uri, id])
            .await
            .map_err(|f| f.into_call_error("start task"))?;
        tracing::debug!(vm_id = %id, console = %log_path.display(), "task started");
        Ok(())
    }

    async fn task_status(&self, id: &str) -> Result<TaskStatus, ExecutorError> {
        let out = self
            .run(&["tasks", "list"])
            .await
            .map_err(|f| f.into_call_error("task status"))?;
        parse_task_list(&out, id).ok_or_else(|| ExecutorError::ResourceNotFound {
            kind: ResourceKind::Task,
            name: id.to_owned(),
        })
    }

    async fn kill_task(&self, id: &str, signal: Signal) -> Result<(), ExecutorError> {
        self.run(&["tasks", "kill", "--signal", signal.name(), id])
            .await
            .map_err(|f| f.into_error("kill task", ResourceKind::Task, id))?;
        Ok(())
    }

    async fn delete_task(&self, id: &str, force: bool) -> Result<(), ExecutorError> {
        let mut args = vec!["tasks", "delete"];
        if force {
            args.push("--force");
        }
        args.push(id);
        self.run(&args)
            .await
            .map_err(|f| f.into_error("delete task", ResourceKind::Task, id))?;
        Ok(())
    }
}

/// Find `id` in `ctr tasks list` output and return its status.
///
/// The output is a whitespace-aligned table headed by `TASK PID STATUS`.
#[must_use]
pub fn parse_task_list(output: &str, id: &str) -> Option<TaskStatus> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let task = cols.next()?;
            let _pid = cols.next()?;
            let status = cols.next()?;
            Some((task, status))
        })
        .filter(|(task, _)| *task != "TASK")
        .find(|(task, _)| *task == id)
        .map(|(_, status)| TaskStatus::from_runtime(status))
}

/// One identity per non-blank line, as printed by `containers list --quiet`.
#[must_use]
pub fn parse_id_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Decode the JSON printed by `ctr containers info`.
///
/// # Errors
/// Returns a description of the first missing or malformed field.
pub fn parse_workload_info(json: &str) -> Result<WorkloadInfo, String> {
    let value: serde_json::Value =
        serde_json::from_str(json).map_err(|e| format!("invalid container info: {e}"))?;

    let id = value
        .get("ID")
        .and_then(serde_json::Value::as_str)
        .ok_or("container info has no ID")?
        .to_owned();

    let created_raw = value
        .get("CreatedAt")
        .and_then(serde_json::Value::as_str)
        .ok_or("container info has no CreatedAt")?;
    let created_at = DateTime::parse_from_rfc3339(created_raw)
        .map_err(|e| format!("invalid CreatedAt {created_raw}: {e}"))?
        .with_timezone(&Utc);

    let annotations = value
        .get("Spec")
        .and_then(|spec| spec.get("annotations"))
        .and_then(serde_json::Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
                .collect::<BTreeMap<_, _>>()
        })
        .unwrap_or_default();

    Ok(WorkloadInfo {
        id,
        created_at,
        annotations,
    })
}

/// Returns `true` if `path` names an existing `ctr` binary, directly or via `$PATH`.
#[must_use]
pub fn ctr_available(path: &Path) -> bool {
    if path.is_absolute() {
        return path.exists();
    }
    std::env::var("PATH")
        .unwrap_or_default()
        .split(':')
        .map(|dir| Path::new(dir).join(path))
        .any(|p| p.exists())
}
