//! Post-deploy hooks.
//!
//! Hooks are resolved by name from a closed [`HookRegistry`] before a run
//! starts. A stage that names an unregistered hook fails before any host is
//! contacted.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::{HookDefinition, HookName};
use crate::error::DeployError;

/// What a hook learns about the run that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    /// Name the hook was resolved under.
    pub hook: HookName,
    /// Run identifier.
    pub run_id: String,
    /// Stage role.
    pub role: String,
    /// Hosts that were released, as `user@hostname`.
    pub hosts: Vec<String>,
    /// Deploy path on the hosts.
    pub deploy_path: PathBuf,
}

/// A callback invoked once after every host is released.
#[async_trait]
pub trait PostDeployHook: Send + Sync {
    /// Runs the hook.
    async fn invoke(&self, ctx: &HookContext) -> Result<(), DeployError>;
}

/// Closed set of named hooks.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: BTreeMap<HookName, Arc<dyn PostDeployHook>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl HookRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry of [`ShellHook`]s from stage-declared definitions.
    #[must_use]
    pub fn from_definitions(definitions: &BTreeMap<HookName, HookDefinition>) -> Self {
        let mut registry = Self::new();
        for (name, definition) in definitions {
            registry.register(name.clone(), ShellHook::from_definition(definition));
        }
        registry
    }

    /// Registers a hook, returning true if it replaced an existing one.
    pub fn register(&mut self, name: HookName, hook: impl PostDeployHook + 'static) -> bool {
        debug!("Registering post-deploy hook '{name}'");
        self.hooks.insert(name, Arc::new(hook)).is_some()
    }

    /// Returns true if a hook is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &HookName) -> bool {
        self.hooks.contains_key(name)
    }

    /// Returns the registered names in order.
    #[must_use]
    pub fn names(&self) -> Vec<&HookName> {
        self.hooks.keys().collect()
    }

    /// Resolves the hook a stage asks for.
    ///
    /// No name resolves to no hook.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::UnknownHook`] if the name is not registered.
    pub fn resolve(
        &self,
        name: Option<&HookName>,
    ) -> Result<Option<(HookName, Arc<dyn PostDeployHook>)>, DeployError> {
        let Some(name) = name else {
            return Ok(None);
        };

        self.hooks
            .get(name)
            .map(|hook| Some((name.clone(), Arc::clone(hook))))
            .ok_or_else(|| DeployError::UnknownHook {
                hook: name.to_string(),
            })
    }
}

/// Hook that runs a local command.
///
/// The command sees `DEPLOY_STAGE_HOOK`, `DEPLOY_STAGE_RUN_ID`,
/// `DEPLOY_STAGE_ROLE`, `DEPLOY_STAGE_HOSTS` and `DEPLOY_STAGE_DEPLOY_PATH`
/// in its environment, plus any variables from the definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellHook {
    command: Vec<String>,
    env: BTreeMap<String, String>,
}

impl ShellHook {
    /// Creates a hook running `command`.
    #[must_use]
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            env: BTreeMap::new(),
        }
    }

    /// Creates a hook from a stage definition.
    #[must_use]
    pub fn from_definition(definition: &HookDefinition) -> Self {
        Self {
            command: definition.command.clone(),
            env: definition.env.clone(),
        }
    }
}

#[async_trait]
impl PostDeployHook for ShellHook {
    async fn invoke(&self, ctx: &HookContext) -> Result<(), DeployError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(DeployError::HookFailed {
                hook: ctx.hook.to_string(),
                reason: String::from("empty command"),
            });
        };

        info!("Running post-deploy hook '{}': {program}", ctx.hook);

        let status = Command::new(program)
            .args(args)
            .envs(&self.env)
            .env("DEPLOY_STAGE_HOOK", ctx.hook.as_str())
            .env("DEPLOY_STAGE_RUN_ID", &ctx.run_id)
            .env("DEPLOY_STAGE_ROLE", &ctx.role)
            .env("DEPLOY_STAGE_HOSTS", ctx.hosts.join(","))
            .env("DEPLOY_STAGE_DEPLOY_PATH", &ctx.deploy_path)
            .status()
            .await
            .map_err(|e| DeployError::HookFailed {
                hook: ctx.hook.to_string(),
                reason: format!("failed to spawn {program}: {e}"),
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(DeployError::HookFailed {
                hook: ctx.hook.to_string(),
                reason: format!("{program} exited with {status}"),
            })
        }
    }
}
