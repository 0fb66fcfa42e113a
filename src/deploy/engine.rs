//! Deploy engine trait definition.
//!
//! This module defines the seam between a validated stage and whatever
//! actually talks to the hosts. The engine is a black box: this crate only
//! decides the order of calls and what happens when one fails.

use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use crate::config::{HostConfig, SshOptions};
use crate::error::DeployError;

/// Trait for deploy engines.
#[async_trait]
pub trait DeployEngine: Send + Sync {
    /// Establishes SSH connectivity to a host.
    async fn connect(&self, host: &HostConfig, ssh: &SshOptions) -> Result<(), DeployError>;

    /// Runs the release workflow for `deploy_path` on a host.
    async fn release(
        &self,
        host: &HostConfig,
        ssh: &SshOptions,
        deploy_path: &Path,
    ) -> Result<(), DeployError>;
}

/// Engine that logs each step and never touches the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunEngine;

impl DryRunEngine {
    /// Creates a new dry-run engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeployEngine for DryRunEngine {
    async fn connect(&self, host: &HostConfig, ssh: &SshOptions) -> Result<(), DeployError> {
        info!(
            "[dry-run] would connect to {} on port {}",
            host.address(),
            ssh.effective_port()
        );
        Ok(())
    }

    async fn release(
        &self,
        host: &HostConfig,
        _ssh: &SshOptions,
        deploy_path: &Path,
    ) -> Result<(), DeployError> {
        info!(
            "[dry-run] would release to {} on {}",
            deploy_path.display(),
            host.address()
        );
        Ok(())
    }
}
