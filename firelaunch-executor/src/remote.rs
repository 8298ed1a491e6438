//! Remote shell access to a booted guest.
//!
//! Uses the system `ssh` client with public-key authentication. Host keys
//! are not verified: guests are operator-controlled microVMs on a private
//! segment whose host keys change on every fresh boot. Do not point this at
//! multi-tenant or internet-facing hosts.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::cancel::CancelToken;
use crate::key::{parse_private_key, KeyFormat};
use crate::poll::{poll_until, PollError};
use crate::ExecutorError;

/// Interval between connection attempts in [`RemoteShell::wait_ready`].
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// TCP dial timeout for every connection.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// `ssh` exits with this status when the connection itself failed.
const SSH_CONNECTION_FAILED: i32 = 255;

/// `-o` options shared by every invocation.
///
/// * `StrictHostKeyChecking=no` / `UserKnownHostsFile=/dev/null`: host key
///   verification is off and nothing is written to known_hosts.
/// * `BatchMode=yes`: never prompt; key auth succeeds or the call fails.
/// * `IdentitiesOnly=yes`: offer only the configured key.
const SSH_OPTS: &[&str] = &[
    "StrictHostKeyChecking=no",
    "UserKnownHostsFile=/dev/null",
    "LogLevel=ERROR",
    "BatchMode=yes",
    "IdentitiesOnly=yes",
    "PasswordAuthentication=no",
];

/// Client for one guest, identified by address, port and user.
#[derive(Debug, Clone)]
pub struct RemoteShell {
    program: PathBuf,
    host: String,
    port: u16,
    user: String,
    key_path: PathBuf,
    key_format: KeyFormat,
}

impl RemoteShell {
    /// Build a client, reading and parsing the private key up front.
    ///
    /// # Errors
    /// Returns [`ExecutorError::InvalidKey`] if the key file cannot be read or
    /// is not an unencrypted private key.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        key_path: &Path,
    ) -> Result<Self, ExecutorError> {
        let text = std::fs::read_to_string(key_path).map_err(|e| ExecutorError::InvalidKey {
            path: key_path.to_owned(),
            reason: format!("unable to read private key: {e}"),
        })?;
        let key_format = parse_private_key(&text).map_err(|reason| ExecutorError::InvalidKey {
            path: key_path.to_owned(),
            reason: format!("unable to parse private key: {reason}"),
        })?;

        Ok(Self {
            program: PathBuf::from("ssh"),
            host: host.into(),
            port,
            user: user.into(),
            key_path: key_path.to_owned(),
            key_format,
        })
    }

    /// Use a different `ssh` binary.
    #[must_use]
    pub fn with_program(mut self, program: PathBuf) -> Self {
        self.program = program;
        self
    }

    /// `host:port` this client connects to.
    #[must_use]
    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Format of the loaded private key.
    #[must_use]
    pub fn key_format(&self) -> KeyFormat {
        self.key_format
    }

    /// Wait until the guest accepts an authenticated connection.
    ///
    /// Tries once per second; each connection that succeeds is closed
    /// straight away.
    ///
    /// # Errors
    /// Returns [`ExecutorError::ReadinessTimeout`] if no attempt succeeds
    /// within `timeout`, or [`ExecutorError::Cancelled`].
    pub async fn wait_ready(
        &self,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<(), ExecutorError> {
        tracing::info!(target = %self.target(), timeout_s = timeout.as_secs(), "waiting for ssh");

        let polled = poll_until(READY_POLL_INTERVAL, timeout, cancel, || async move {
            Ok::<_, std::convert::Infallible>(self.try_connect().await.then_some(()))
        })
        .await;

        match polled {
            Ok(()) => {
                tracing::info!(target = %self.target(), "ssh is reachable");
                Ok(())
            }
            Err(PollError::Cancelled) => Err(ExecutorError::Cancelled),
            Err(PollError::TimedOut | PollError::Check(_)) => {
                Err(ExecutorError::ReadinessTimeout {
                    what: "ssh",
                    timeout,
                })
            }
        }
    }

    /// Run `command` on the guest and return its combined output.
    ///
    /// The combined output is everything the command wrote to stdout
    /// followed by everything it wrote to stderr. The two streams are
    /// captured separately, so their interleaving is not preserved.
    ///
    /// Each call opens its own connection, which is torn down on every
    /// return path, including when the future is dropped.
    ///
    /// # Errors
    /// Returns [`ExecutorError::RemoteConnect`] if no session could be
    /// established and [`ExecutorError::RemoteCommand`] if the command exits
    /// non-zero.
    pub async fn execute(&self, command: &str) -> Result<String, ExecutorError> {
        tracing::debug!(target = %self.target(), %command, "executing remote command");

        let output = self
            .command(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ExecutorError::RemoteConnect {
                target: self.target(),
                reason: format!("exec {}: {e}", self.program.display()),
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        match output.status.code() {
            Some(0) => Ok(combined),
            Some(SSH_CONNECTION_FAILED) => Err(ExecutorError::RemoteConnect {
                target: self.target(),
                reason: combined.trim().to_owned(),
            }),
            Some(status) => Err(ExecutorError::RemoteCommand {
                status,
                output: combined,
            }),
            None => Err(ExecutorError::RemoteConnect {
                target: self.target(),
                reason: "ssh terminated by signal".to_owned(),
            }),
        }
    }

    async fn try_connect(&self) -> bool {
        let mut cmd = self.command("true");
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Dial timeout plus headroom for the auth handshake.
        match tokio::time::timeout(DIAL_TIMEOUT * 2, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "failed to spawn ssh");
                false
            }
            Err(_) => false,
        }
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        for opt in SSH_OPTS {
            cmd.arg("-o").arg(opt);
        }
        // `--` ends option parsing, so a user or host starting with `-` is
        // never read as an ssh option.
        cmd.arg("-o")
            .arg(format!("ConnectTimeout={}", DIAL_TIMEOUT.as_secs()))
            .arg("-i")
            .arg(&self.key_path)
            .arg("-p")
            .arg(self.port.to_string())
            .arg("--")
            .arg(format!("{}@{}", self.user, self.host))
            .arg(remote)
            .kill_on_drop(true);
        cmd
    }
}
