//! Deploy contract module.
//!
//! This module fixes what an engine must do with a validated stage:
//! - Connect to every host, then release to every host, in stage order
//! - Abort on the first failure without running the post-deploy hook
//! - Run the post-deploy hook exactly once after activation

mod engine;
mod hooks;
mod phase;
mod run;
mod ssh;

pub use engine::{DeployEngine, DryRunEngine};
pub use hooks::{HookContext, HookRegistry, PostDeployHook, ShellHook};
pub use phase::RunPhase;
pub use run::{DeployReport, DeployRun, HostOutcome};
pub use ssh::SshEngine;
