//! SSH engine backed by the system `ssh` client.
//!
//! `connect` runs `true` on the host to prove login works. `release` makes
//! sure the deploy path exists and is writable by the deploy user. Anything
//! beyond that (symlink swaps, asset builds) belongs to a richer engine.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{HostConfig, SshOptions};
use crate::error::DeployError;

use super::engine::DeployEngine;

/// Default SSH connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default timeout for a whole remote command in seconds.
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 120;

/// Engine that shells out to `ssh`.
#[derive(Debug, Clone)]
pub struct SshEngine {
    /// SSH client program.
    program: String,
    /// Value for `-o ConnectTimeout`.
    connect_timeout_secs: u64,
    /// Upper bound for a single remote command.
    command_timeout_secs: u64,
}

/// Outcome of one remote command.
#[derive(Debug, Clone)]
struct RemoteOutput {
    success: bool,
    stderr: String,
}

impl Default for SshEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SshEngine {
    /// Creates an engine using `ssh` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: String::from("ssh"),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }

    /// Uses a different SSH client program.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets the SSH connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, secs: u64) -> Self {
        self.connect_timeout_secs = secs;
        self
    }

    /// Sets the per-command timeout.
    #[must_use]
    pub const fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    /// Builds the `ssh` argument list for a remote command.
    #[must_use]
    pub fn ssh_args(&self, host: &HostConfig, ssh: &SshOptions, remote: &str) -> Vec<String> {
        let mut args = vec![
            String::from("-o"),
            String::from("BatchMode=yes"),
            String::from("-o"),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
        ];

        if let Some(port) = ssh.port() {
            args.push(String::from("-p"));
            args.push(port.to_string());
        }

        for key in ssh.key_paths().unwrap_or_default() {
            args.push(String::from("-i"));
            args.push(key.display().to_string());
        }

        // Destination is never parsed as an option.
        args.push(String::from("--"));
        args.push(host.address());
        args.push(remote.to_string());
        args
    }

    /// Runs a remote command, bounded by the command timeout.
    async fn run(
        &self,
        host: &HostConfig,
        ssh: &SshOptions,
        remote: &str,
    ) -> Result<RemoteOutput, DeployError> {
        let args = self.ssh_args(host, ssh, remote);
        debug!("Running on {}: {}", host.address(), remote);

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(Duration::from_secs(self.command_timeout_secs), output)
            .await
            .map_err(|_| DeployError::Timeout {
                host: host.address(),
                secs: self.command_timeout_secs,
            })?
            .map_err(|e| DeployError::ConnectionFailed {
                host: host.address(),
                message: format!("failed to spawn {}: {e}", self.program),
            })?;

        Ok(RemoteOutput {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[async_trait]
impl DeployEngine for SshEngine {
    async fn connect(&self, host: &HostConfig, ssh: &SshOptions) -> Result<(), DeployError> {
        info!("Connecting to {} on port {}", host.address(), ssh.effective_port());

        let output = self.run(host, ssh, "true").await?;
        if output.success {
            Ok(())
        } else {
            warn!("Connection to {} failed", host.address());
            Err(DeployError::ConnectionFailed {
                host: host.address(),
                message: output.stderr,
            })
        }
    }

    async fn release(
        &self,
        host: &HostConfig,
        ssh: &SshOptions,
        deploy_path: &Path,
    ) -> Result<(), DeployError> {
        info!("Releasing to {} on {}", deploy_path.display(), host.address());

        let path = shell_quote(&deploy_path.to_string_lossy());
        let remote = format!("mkdir -p {path} && test -w {path}");

        let output = self.run(host, ssh, &remote).await?;
        if output.success {
            Ok(())
        } else {
            Err(DeployError::ReleaseFailed {
                host: host.address(),
                message: output.stderr,
            })
        }
    }
}

/// Quotes a value for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
