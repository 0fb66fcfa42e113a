//! Stage descriptor validation.
//!
//! Turns a [`RawStage`] into an immutable [`StageConfig`]. Every problem found
//! is collected; the first one (in field order) is returned as the error.

use crate::error::{ConfigError, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::keys::select_existing_keys;
use super::spec::{
    ApiToken, HookDefinition, HookName, HostConfig, RawHost, RawHostEntry, RawSshOptions,
    RawStage, SshOptions, StageConfig, DEFAULT_SSH_PORT,
};

/// Validator for stage descriptors.
#[derive(Debug, Default)]
pub struct StageValidator {
    /// Base directory for relative key paths.
    key_base: Option<PathBuf>,
}

/// A validated stage together with non-fatal findings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedStage {
    config: StageConfig,
    warnings: Vec<String>,
}

/// Accumulates findings while walking a raw stage.
#[derive(Debug, Default)]
struct Findings {
    errors: Vec<ConfigError>,
    warnings: Vec<String>,
}

impl StageValidator {
    /// Creates a validator that resolves relative key paths against the
    /// working directory.
    #[must_use]
    pub const fn new() -> Self {
        Self { key_base: None }
    }

    /// Sets the base directory for relative key paths.
    #[must_use]
    pub fn with_key_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.key_base = Some(base.into());
        self
    }

    /// Validates a raw stage descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found, in field order.
    pub fn validate(&self, raw: &RawStage) -> Result<LoadedStage> {
        let mut findings = Findings::default();

        let role = Self::validate_role(raw.role.as_deref(), &mut findings);
        let hosts = Self::validate_hosts(raw.hosts.as_deref(), role.as_deref(), &mut findings);
        let ssh_options = self.validate_ssh(raw.ssh_options.as_ref(), &mut findings);
        let api_token = Self::required(raw.api_token.as_deref(), "api_token", &mut findings);
        let deploy_path = Self::validate_deploy_path(raw.deploy_path.as_deref(), &mut findings);
        let post_deploy_hook =
            Self::validate_hook_name(raw.post_deploy_hook.as_deref(), &mut findings);
        let hooks = Self::validate_hook_definitions(&raw.hooks, &mut findings);

        if !findings.errors.is_empty() {
            for error in &findings.errors {
                debug!("Stage validation error: {error}");
            }
            return Err(findings.errors.swap_remove(0).into());
        }

        match (role, api_token, deploy_path) {
            (Some(role), Some(api_token), Some(deploy_path)) => {
                debug!("Stage validation passed for role '{role}'");
                Ok(LoadedStage {
                    config: StageConfig::new(
                        role,
                        hosts,
                        ssh_options,
                        ApiToken::new(api_token),
                        deploy_path,
                        post_deploy_hook,
                        hooks,
                    ),
                    warnings: findings.warnings,
                })
            }
            // Every None above already pushed an error.
            _ => Err(ConfigError::parse("incomplete stage after validation").into()),
        }
    }

    /// Validates the role label.
    fn validate_role(role: Option<&str>, findings: &mut Findings) -> Option<String> {
        Self::required(role, "role", findings)
    }

    /// Validates the host list and each entry's role membership.
    fn validate_hosts(
        hosts: Option<&[RawHost]>,
        role: Option<&str>,
        findings: &mut Findings,
    ) -> Vec<HostConfig> {
        let Some(hosts) = hosts else {
            findings.errors.push(ConfigError::missing("hosts"));
            return Vec::new();
        };

        if hosts.is_empty() {
            findings.errors.push(ConfigError::NoHosts);
            return Vec::new();
        }

        let mut validated = Vec::with_capacity(hosts.len());
        let mut seen = BTreeSet::new();

        for (i, host) in hosts.iter().enumerate() {
            let prefix = format!("hosts[{i}]");
            let entry = match host {
                RawHost::Shorthand(spec) => match RawHost::split_shorthand(spec) {
                    Ok((user, hostname)) => RawHostEntry {
                        hostname: Some(hostname),
                        user: Some(user),
                        roles: role.map(|r| vec![r.to_string()]),
                    },
                    Err(e) => {
                        findings.errors.push(e);
                        continue;
                    }
                },
                RawHost::Entry(entry) => entry.clone(),
            };

            if let Some(host) = Self::validate_host(&entry, &prefix, role, findings) {
                if !seen.insert(host.address()) {
                    findings
                        .warnings
                        .push(format!("{prefix}: host {} is listed more than once", host.address()));
                }
                validated.push(host);
            }
        }

        validated
    }

    /// Validates one host entry.
    fn validate_host(
        entry: &RawHostEntry,
        prefix: &str,
        role: Option<&str>,
        findings: &mut Findings,
    ) -> Option<HostConfig> {
        let hostname = Self::required(
            entry.hostname.as_deref(),
            &format!("{prefix}.hostname"),
            findings,
        );
        let user = Self::required(entry.user.as_deref(), &format!("{prefix}.user"), findings);

        let roles: BTreeSet<String> = entry
            .roles
            .iter()
            .flatten()
            .filter(|r| !r.trim().is_empty())
            .cloned()
            .collect();

        if roles.is_empty() {
            findings.errors.push(ConfigError::missing(format!("{prefix}.roles")));
            return None;
        }

        let (hostname, user) = (hostname?, user?);

        for (field, value) in [("hostname", &hostname), ("user", &user)] {
            if value.starts_with('-') {
                findings.errors.push(ConfigError::InvalidHostField {
                    field: format!("{prefix}.{field}"),
                    value: value.clone(),
                });
                return None;
            }
        }

        if let Some(role) = role.filter(|r| !roles.contains(*r)) {
            findings.errors.push(ConfigError::RoleMismatch {
                host: format!("{user}@{hostname}"),
                role: role.to_string(),
            });
            return None;
        }

        Some(HostConfig::new(hostname, user, roles))
    }

    /// Validates SSH options and filters key paths by existence.
    fn validate_ssh(&self, ssh: Option<&RawSshOptions>, findings: &mut Findings) -> SshOptions {
        let Some(ssh) = ssh else {
            return SshOptions::default();
        };

        let port = ssh.port.and_then(|port| match u16::try_from(port) {
            Ok(p) if p >= 1 => {
                if p < 1024 && p != DEFAULT_SSH_PORT {
                    findings
                        .warnings
                        .push(format!("ssh_options.port: {p} is in the reserved range (<1024)"));
                }
                Some(p)
            }
            _ => {
                findings.errors.push(ConfigError::InvalidPort { port });
                None
            }
        });

        let key_paths = ssh.key_paths.as_ref().and_then(|candidates| {
            let selection = select_existing_keys(candidates, self.key_base.as_deref());
            for dropped in &selection.dropped {
                findings.warnings.push(format!(
                    "ssh_options.key_paths: {} not found, using engine default authentication",
                    dropped.display()
                ));
            }
            selection.into_option()
        });

        SshOptions::new(key_paths, port)
    }

    /// Validates the deploy path.
    fn validate_deploy_path(path: Option<&str>, findings: &mut Findings) -> Option<PathBuf> {
        let path = Self::required(path, "deploy_path", findings)?;

        if Path::new(&path).is_absolute() {
            Some(PathBuf::from(path))
        } else {
            findings.errors.push(ConfigError::RelativeDeployPath { path });
            None
        }
    }

    /// Validates the post-deploy hook name.
    fn validate_hook_name(name: Option<&str>, findings: &mut Findings) -> Option<HookName> {
        match name.map(str::trim) {
            None | Some("") => {
                findings
                    .warnings
                    .push(String::from("post_deploy_hook: not set, no hook will run"));
                None
            }
            Some(name) => match HookName::parse(name) {
                Ok(hook) => Some(hook),
                Err(e) => {
                    findings.errors.push(e);
                    None
                }
            },
        }
    }

    /// Validates hooks declared in the stage source.
    fn validate_hook_definitions(
        hooks: &BTreeMap<String, HookDefinition>,
        findings: &mut Findings,
    ) -> BTreeMap<HookName, HookDefinition> {
        let mut validated = BTreeMap::new();

        for (name, definition) in hooks {
            let hook = match HookName::parse(name) {
                Ok(hook) => hook,
                Err(e) => {
                    findings.errors.push(e);
                    continue;
                }
            };

            if definition.command.first().is_none_or(|program| program.is_empty()) {
                findings
                    .errors
                    .push(ConfigError::missing(format!("hooks.{name}.command")));
                continue;
            }

            validated.insert(hook, definition.clone());
        }

        validated
    }

    /// Returns the value if present and non-empty, recording an error otherwise.
    fn required(value: Option<&str>, field: &str, findings: &mut Findings) -> Option<String> {
        match value {
            Some(v) if !v.trim().is_empty() => Some(v.to_string()),
            _ => {
                findings.errors.push(ConfigError::missing(field));
                None
            }
        }
    }
}

impl LoadedStage {
    /// Returns the validated stage.
    #[must_use]
    pub const fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Consumes the wrapper and returns the validated stage.
    #[must_use]
    pub fn into_config(self) -> StageConfig {
        self.config
    }

    /// Returns non-fatal findings.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}
