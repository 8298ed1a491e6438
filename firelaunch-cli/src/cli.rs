//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.yaml";

/// Default ssh readiness timeout, in seconds.
pub const DEFAULT_SSH_TIMEOUT_SECS: u64 = 60;

/// Launch and manage Firecracker microVMs through containerd.
#[derive(Debug, Parser)]
#[command(name = "firelaunch", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch the configured VM and keep running until interrupted.
    Launch {
        /// Wait until the guest accepts ssh before reporting success.
        #[arg(long)]
        wait_ssh: bool,

        /// Stop the VM when interrupted instead of leaving it running.
        #[arg(long)]
        stop_on_exit: bool,
    },

    /// Stop a VM and remove it from the runtime.
    Stop {
        /// VM identifier.
        id: String,
    },

    /// List VMs known to the runtime.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Run a command on the configured guest over ssh.
    Exec {
        /// Command and arguments, joined with spaces.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Wait until the configured guest accepts ssh.
    WaitSsh {
        /// Seconds to wait before giving up.
        #[arg(long, default_value_t = DEFAULT_SSH_TIMEOUT_SECS)]
        timeout: u64,
    },
}

impl Cli {
    /// The configuration path, made absolute against the working directory.
    ///
    /// # Errors
    /// Returns an I/O error if the working directory cannot be determined.
    pub fn config_path(&self) -> std::io::Result<PathBuf> {
        std::path::absolute(&self.config)
    }
}

impl Command {
    /// Readiness timeout for `wait-ssh`.
    #[must_use]
    pub fn ssh_timeout(&self) -> Duration {
        match self {
            Self::WaitSsh { timeout } => Duration::from_secs(*timeout),
            _ => Duration::from_secs(DEFAULT_SSH_TIMEOUT_SECS),
        }
    }
}
