//! Deploy run driver.
//!
//! [`DeployRun::apply`] walks a stage through its phases against any
//! [`DeployEngine`]. Hosts are handled one at a time in stage order. The first
//! failure aborts the remaining hosts and the post-deploy hook is skipped; on
//! overall success the hook runs exactly once.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::{HostConfig, StageConfig, StageFingerprint};
use crate::error::{DeployError, Result};

use super::engine::DeployEngine;
use super::hooks::{HookContext, HookRegistry};
use super::phase::RunPhase;

/// Drives one deploy run.
pub struct DeployRun<'a> {
    /// Engine that talks to the hosts.
    engine: &'a dyn DeployEngine,
    /// Hooks available to the stage.
    hooks: &'a HookRegistry,
}

/// Per-host progress within a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HostOutcome {
    /// Host in `user@hostname` form.
    pub host: String,
    /// Whether connectivity was established.
    pub connected: bool,
    /// Whether the release succeeded.
    pub released: bool,
}

/// Summary of a successful run.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    /// Unique run identifier.
    pub run_id: String,
    /// Fingerprint of the applied stage.
    pub fingerprint: String,
    /// Stage role.
    pub role: String,
    /// Final phase.
    pub phase: RunPhase,
    /// Per-host outcomes in stage order.
    pub hosts: Vec<HostOutcome>,
    /// Hook the stage named, if any.
    pub hook: Option<String>,
    /// Whether the hook ran.
    pub hook_invoked: bool,
    /// Machine the run was started from.
    pub initiated_from: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

impl<'a> DeployRun<'a> {
    /// Creates a run over `engine` with the given hooks.
    #[must_use]
    pub const fn new(engine: &'a dyn DeployEngine, hooks: &'a HookRegistry) -> Self {
        Self { engine, hooks }
    }

    /// Applies a stage.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::UnknownHook`] before contacting any host if the
    /// stage names an unregistered hook, [`DeployError::Aborted`] if a host
    /// fails to connect or release, and [`DeployError::HookFailed`] if the
    /// hook itself fails after activation.
    pub async fn apply(&self, config: &StageConfig) -> Result<DeployReport> {
        let hook = self.hooks.resolve(config.post_deploy_hook())?;

        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut phase = RunPhase::Pending;
        let mut outcomes: Vec<HostOutcome> = config
            .hosts()
            .iter()
            .map(|h| HostOutcome {
                host: h.address(),
                connected: false,
                released: false,
            })
            .collect();

        info!(
            "Starting deploy run {run_id} for role '{}' ({} host(s))",
            config.role(),
            outcomes.len()
        );

        phase = advance(phase);
        for (host, outcome) in config.hosts().iter().zip(outcomes.iter_mut()) {
            if let Err(e) = self.engine.connect(host, config.ssh_options()).await {
                return Err(abort(phase, host, &e).into());
            }
            outcome.connected = true;
        }

        phase = advance(phase);
        for (host, outcome) in config.hosts().iter().zip(outcomes.iter_mut()) {
            if let Err(e) = self
                .engine
                .release(host, config.ssh_options(), config.deploy_path())
                .await
            {
                return Err(abort(phase, host, &e).into());
            }
            outcome.released = true;
        }

        phase = advance(phase);
        info!("Deploy run {run_id} activated");

        let hook_invoked = match &hook {
            Some((name, hook)) => {
                let ctx = HookContext {
                    hook: name.clone(),
                    run_id: run_id.clone(),
                    role: config.role().to_string(),
                    hosts: config.host_addresses(),
                    deploy_path: config.deploy_path().to_path_buf(),
                };
                hook.invoke(&ctx).await.map_err(|e| match e {
                    DeployError::HookFailed { .. } => e,
                    other => DeployError::HookFailed {
                        hook: name.to_string(),
                        reason: other.to_string(),
                    },
                })?;
                true
            }
            None => false,
        };

        Ok(DeployReport {
            run_id,
            fingerprint: StageFingerprint::new().of(config),
            role: config.role().to_string(),
            phase,
            hosts: outcomes,
            hook: hook.map(|(name, _)| name.to_string()),
            hook_invoked,
            initiated_from: initiated_from(),
            started_at,
            finished_at: Utc::now(),
        })
    }
}

impl DeployReport {
    /// Returns true if the run reached activation.
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.phase == RunPhase::Activated
    }
}

/// Moves to the next phase. Only called on non-terminal phases.
fn advance(phase: RunPhase) -> RunPhase {
    phase.next().unwrap_or(phase)
}

/// Logs a host failure and builds the abort error.
fn abort(phase: RunPhase, host: &HostConfig, cause: &DeployError) -> DeployError {
    error!(
        "Deploy run {} while {phase} on {}: {cause}",
        phase.fail(),
        host.address()
    );
    DeployError::Aborted {
        phase,
        host: host.address(),
        reason: cause.to_string(),
    }
}

/// Identifies the machine starting the run.
fn initiated_from() -> String {
    hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HookName, SshOptions, StageLoader, StageSource};
    use crate::deploy::PostDeployHook;
    use crate::error::StageError;
    use async_trait::async_trait;
    use mockall::mock;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    mock! {
        Engine {}

        #[async_trait]
        impl DeployEngine for Engine {
            async fn connect(&self, host: &HostConfig, ssh: &SshOptions) -> std::result::Result<(), DeployError>;
            async fn release(
                &self,
                host: &HostConfig,
                ssh: &SshOptions,
                deploy_path: &Path,
            ) -> std::result::Result<(), DeployError>;
        }
    }

    /// Hook that counts its invocations.
    #[derive(Clone, Default)]
    struct CountingHook(Arc<AtomicUsize>);

    #[async_trait]
    impl PostDeployHook for CountingHook {
        async fn invoke(&self, _ctx: &HookContext) -> std::result::Result<(), DeployError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    const MERCHANT_STAGE: &str = r"
role: www
hosts:
  - hostname: tunnel.example.com
    user: deployer
    roles: [www]
ssh_options:
  port: 7047
api_token: X
deploy_path: /var/www/app
post_deploy_hook: activate_merchant_e
";

    fn load(yaml: &str) -> StageConfig {
        StageLoader::new()
            .with_env(|_| None)
            .load(StageSource::Yaml(yaml.to_string()))
            .unwrap()
            .into_config()
    }

    fn registry_with_counter() -> (HookRegistry, Arc<AtomicUsize>) {
        let hook = CountingHook::default();
        let calls = Arc::clone(&hook.0);
        let mut registry = HookRegistry::new();
        registry.register(HookName::parse("activate_merchant_e").unwrap(), hook);
        (registry, calls)
    }

    #[tokio::test]
    async fn test_connect_failure_skips_hook() {
        let config = load(MERCHANT_STAGE);
        let (registry, calls) = registry_with_counter();

        let mut engine = MockEngine::new();
        engine.expect_connect().times(1).returning(|host, _| {
            Err(DeployError::ConnectionFailed {
                host: host.address(),
                message: String::from("connection refused"),
            })
        });
        engine.expect_release().never();

        let err = DeployRun::new(&engine, &registry)
            .apply(&config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StageError::Deploy(DeployError::Aborted {
                phase: RunPhase::Connecting,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_success_invokes_hook_once() {
        let config = load(MERCHANT_STAGE);
        let (registry, calls) = registry_with_counter();

        let mut engine = MockEngine::new();
        engine
            .expect_connect()
            .withf(|host, ssh| host.hostname() == "tunnel.example.com" && ssh.port() == Some(7047))
            .times(1)
            .returning(|_, _| Ok(()));
        engine
            .expect_release()
            .withf(|_, _, path| path == Path::new("/var/www/app"))
            .times(1)
            .returning(|_, _, _| Ok(()));

        let report = DeployRun::new(&engine, &registry)
            .apply(&config)
            .await
            .unwrap();

        assert!(report.is_activated());
        assert!(report.hook_invoked);
        assert_eq!(report.hook.as_deref(), Some("activate_merchant_e"));
        assert_eq!(report.hosts[0].host, "deployer@tunnel.example.com");
        assert!(report.hosts[0].released);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_failure_aborts_remaining_hosts() {
        let config = load(
            r"
role: www
hosts:
  - deployer@a.example.com
  - deployer@b.example.com
  - deployer@c.example.com
api_token: X
deploy_path: /var/www/app
post_deploy_hook: activate_merchant_e
",
        );
        let (registry, calls) = registry_with_counter();

        let mut engine = MockEngine::new();
        engine.expect_connect().times(3).returning(|_, _| Ok(()));
        engine.expect_release().times(2).returning(|host, _, _| {
            if host.hostname() == "b.example.com" {
                Err(DeployError::ReleaseFailed {
                    host: host.address(),
                    message: String::from("permission denied"),
                })
            } else {
                Ok(())
            }
        });

        let err = DeployRun::new(&engine, &registry)
            .apply(&config)
            .await
            .unwrap_err();

        match err {
            StageError::Deploy(DeployError::Aborted { phase, host, .. }) => {
                assert_eq!(phase, RunPhase::Releasing);
                assert_eq!(host, "deployer@b.example.com");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_hook_fails_before_connecting() {
        let config = load(MERCHANT_STAGE);
        let registry = HookRegistry::new();

        let mut engine = MockEngine::new();
        engine.expect_connect().never();
        engine.expect_release().never();

        let err = DeployRun::new(&engine, &registry)
            .apply(&config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StageError::Deploy(DeployError::UnknownHook { .. })
        ));
    }

    #[tokio::test]
    async fn test_no_hook_is_noop() {
        let config = load(&MERCHANT_STAGE.replace("post_deploy_hook: activate_merchant_e\n", ""));
        let registry = HookRegistry::new();

        let mut engine = MockEngine::new();
        engine.expect_connect().returning(|_, _| Ok(()));
        engine.expect_release().returning(|_, _, _| Ok(()));

        let report = DeployRun::new(&engine, &registry)
            .apply(&config)
            .await
            .unwrap();

        assert!(report.is_activated());
        assert!(!report.hook_invoked);
        assert!(report.hook.is_none());
    }

    #[tokio::test]
    async fn test_failing_hook_is_reported() {
        let config = load(MERCHANT_STAGE);
        let mut registry = HookRegistry::new();
        registry.register(
            HookName::parse("activate_merchant_e").unwrap(),
            crate::deploy::ShellHook::new(vec![String::from("false")]),
        );

        let mut engine = MockEngine::new();
        engine.expect_connect().returning(|_, _| Ok(()));
        engine.expect_release().returning(|_, _, _| Ok(()));

        let err = DeployRun::new(&engine, &registry)
            .apply(&config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StageError::Deploy(DeployError::HookFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_dry_run_engine_activates() {
        let config = load(MERCHANT_STAGE);
        let (registry, calls) = registry_with_counter();
        let engine = crate::deploy::DryRunEngine::new();

        let report = DeployRun::new(&engine, &registry)
            .apply(&config)
            .await
            .unwrap();

        assert_eq!(report.phase, RunPhase::Activated);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.fingerprint, StageFingerprint::new().of(&config));
    }
}
