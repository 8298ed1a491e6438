//! Subcommand implementations.

use std::fmt::Write as _;
use std::time::Duration;

use firelaunch_core::{LauncherConfig, VmId, VmState};
use firelaunch_executor::{
    CancelToken, CtrRuntime, OrchestratorSettings, RemoteShell, VmOrchestrator,
};

use crate::cli::{Cli, Command, DEFAULT_SSH_TIMEOUT_SECS};
use crate::error::CliError;

/// Load the configuration named by `cli` and run its subcommand.
///
/// `cancel` is fired by the binary on SIGINT/SIGTERM.
///
/// # Errors
/// Returns the first error the subcommand hits.
pub async fn run(cli: &Cli, cancel: &CancelToken) -> Result<(), CliError> {
    let path = cli.config_path()?;
    let config = LauncherConfig::from_path(&path)?;
    tracing::debug!(config = %path.display(), vm_id = %config.vm.id, "configuration loaded");

    match &cli.command {
        Command::Launch {
            wait_ssh,
            stop_on_exit,
        } => {
            launch(&config, *wait_ssh, *stop_on_exit, cancel).await
        }
        Command::Stop { id } => {
            let orch = orchestrator(&config).await?;
            orch.stop(id, cancel).await?;
            println!("VM {id} stopped");
            Ok(())
        }
        Command::List { json } => {
            let orch = orchestrator(&config).await?;
            let vms = orch.list(cancel).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&vms)?);
            } else {
                print!("{}", format_table(&vms));
            }
            Ok(())
        }
        Command::Exec { command } => {
            let shell = remote_shell(&config)?;
            let output = shell.execute(&command.join(" ")).await?;
            print!("{output}");
            Ok(())
        }
        Command::WaitSsh { .. } => {
            remote_shell(&config)?
                .wait_ready(cli.command.ssh_timeout(), cancel)
                .await?;
            println!("ssh is reachable at {}", config.vm.ip);
            Ok(())
        }
    }
}

async fn launch(
    config: &LauncherConfig,
    wait_ssh: bool,
    stop_on_exit: bool,
    cancel: &CancelToken,
) -> Result<(), CliError> {
    let orch = orchestrator(config).await?;
    let id = orch.launch(&config.vm, cancel).await?;

    println!("VM launched successfully. ID: {id}");
    let console = orch.runtime().console_log_path(id.as_str());
    println!("Guest console is logged to {}", console.display());
    println!("You can SSH into the VM using: {}", ssh_hint(config));

    if wait_ssh {
        let ready = match remote_shell(config) {
            Ok(shell) => shell
                .wait_ready(Duration::from_secs(DEFAULT_SSH_TIMEOUT_SECS), cancel)
                .await
                .map_err(CliError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = ready {
            if stop_on_exit {
                stop_on_shutdown(&orch, &id).await;
            }
            return Err(e);
        }
        println!("ssh is reachable at {}", config.vm.ip);
    }

    tracing::info!(vm_id = %id, stop_on_exit, "waiting for SIGINT or SIGTERM");
    cancel.cancelled().await;
    tracing::info!(vm_id = %id, "shutting down");

    if stop_on_exit {
        stop_on_shutdown(&orch, &id).await;
    }
    Ok(())
}

/// Stop a VM after the caller's token has already fired.
async fn stop_on_shutdown(orch: &VmOrchestrator<CtrRuntime>, id: &VmId) {
    if let Err(e) = orch.stop(id.as_str(), &CancelToken::new()).await {
        tracing::error!(vm_id = %id, error = %e, "failed to stop VM on exit");
    }
}

async fn orchestrator(config: &LauncherConfig) -> Result<VmOrchestrator<CtrRuntime>, CliError> {
    let runtime = CtrRuntime::connect(&config.runtime).await?;
    let settings = OrchestratorSettings::new(&config.runtime, config.host.clone());
    Ok(VmOrchestrator::new(runtime, settings))
}

/// Client for the configured guest.
///
/// # Errors
/// Returns [`CliError::MissingGuestAddress`] if `vm.ip` is empty, or the key
/// error from [`RemoteShell::new`].
pub fn remote_shell(config: &LauncherConfig) -> Result<RemoteShell, CliError> {
    if config.vm.ip.is_empty() {
        return Err(CliError::MissingGuestAddress);
    }
    Ok(RemoteShell::new(
        config.vm.ip.clone(),
        config.ssh.port,
        config.ssh.user.clone(),
        &config.ssh.key_path,
    )?)
}

/// The `ssh` invocation an operator would type to reach the guest.
#[must_use]
pub fn ssh_hint(config: &LauncherConfig) -> String {
    let mut hint = format!("ssh -i {}", config.ssh.key_path.display());
    if config.ssh.port != 22 {
        let _ = write!(hint, " -p {}", config.ssh.port);
    }
    let _ = write!(hint, " {}@{}", config.ssh.user, config.vm.ip);
    hint
}

/// Render `vms` as an aligned text table with a header row.
#[must_use]
pub fn format_table(vms: &[VmState]) -> String {
    let rows: Vec<[String; 4]> = vms
        .iter()
        .map(|vm| {
            [
                vm.id.to_string(),
                vm.ip.clone().unwrap_or_else(|| "-".to_owned()),
                vm.created_at_rfc3339(),
                vm.status.clone(),
            ]
        })
        .collect();

    let header = ["ID", "IP", "CREATED", "STATUS"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: [&str; 4]| {
        let line = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ");
        out.push_str(line.trim_end());
        out.push('\n');
    };
    push_row(header);
    for row in &rows {
        let [id, ip, created, status] = row;
        push_row([id, ip, created, status].map(String::as_str));
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use clap::Parser;

    use super::*;

    const CONFIG: &str = r"
vm:
  id: vm1
  image: docker.io/library/alpine:3.19
  kernel: /var/lib/firecracker-containerd/kernel/vmlinux
  cpus: 2
  memory_mb: 512
ssh:
  user: root
  key_path: /root/.ssh/id_ed25519
";

    fn config(yaml: &str) -> LauncherConfig {
        match LauncherConfig::from_yaml_str(yaml) {
            Ok(c) => c,
            Err(e) => panic!("config must parse: {e}"),
        }
    }

    fn state(id: &str, ip: Option<&str>) -> VmState {
        VmState {
            id: VmId::new(id),
            ip: ip.map(str::to_owned),
            created_at: Utc
                .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
                .single()
                .unwrap_or_default(),
            status: "running".to_owned(),
        }
    }

    #[test]
    fn table_aligns_columns_and_marks_missing_ip() {
        let vms = [state("vm1", Some("172.16.0.2")), state("a-longer-id", None)];
        let table = format_table(&vms);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("ID           IP"), "{table}");
        assert_eq!(
            lines[1],
            "vm1          172.16.0.2  2026-03-01T12:00:00Z  running"
        );
        assert!(lines[2].starts_with("a-longer-id  -"), "{table}");
    }

    #[test]
    fn empty_table_has_header_only() {
        assert_eq!(format_table(&[]), "ID  IP  CREATED  STATUS\n");
    }

    #[test]
    fn ssh_hint_includes_port_only_when_non_default() {
        let mut cfg = config(CONFIG);
        cfg.vm.ip = "172.16.0.2".to_owned();
        assert_eq!(
            ssh_hint(&cfg),
            "ssh -i /root/.ssh/id_ed25519 root@172.16.0.2"
        );
        cfg.ssh.port = 2222;
        assert_eq!(
            ssh_hint(&cfg),
            "ssh -i /root/.ssh/id_ed25519 -p 2222 root@172.16.0.2"
        );
    }

    #[test]
    fn remote_shell_requires_guest_address() {
        let result = remote_shell(&config(CONFIG));
        assert!(matches!(result, Err(CliError::MissingGuestAddress)));
    }

    #[tokio::test]
    async fn run_reports_missing_config_file() {
        let args = ["firelaunch", "--config", "/nonexistent/config.yaml", "list"];
        let cli = match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(e) => panic!("parse: {e}"),
        };
        let result = run(&cli, &CancelToken::new()).await;
        assert!(matches!(result, Err(CliError::Config(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn exec_without_guest_address_fails_before_connecting() {
        let dir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("tempdir: {e}"),
        };
        let path = dir.path().join("config.yaml");
        if let Err(e) = std::fs::write(&path, CONFIG) {
            panic!("write config: {e}");
        }
        let arg = path.display().to_string();
        let args = ["firelaunch", "--config", arg.as_str(), "exec", "uptime"];
        let cli = match Cli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(e) => panic!("parse: {e}"),
        };
        let result = run(&cli, &CancelToken::new()).await;
        assert!(matches!(result, Err(CliError::MissingGuestAddress)));
    }
}
