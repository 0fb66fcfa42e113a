// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # deploy_stage
//!
//! Loads, validates and applies deployment stage descriptors.
//!
//! ## Overview
//!
//! A stage names one server role, the hosts that carry it, how to reach them
//! over SSH, an API token, where the application lives on the hosts and an
//! optional post-deploy hook. This crate:
//!
//! - Loads a stage from YAML, an in-memory record or `DEPLOY_STAGE_*` variables
//! - Validates it into an immutable [`StageConfig`], keeping only SSH key
//!   paths that exist at load time
//! - Applies it through a [`DeployEngine`], running the post-deploy hook
//!   exactly once after every host is released
//!
//! ## Modules
//!
//! - [`config`]: Stage loading, validation and fingerprinting
//! - [`deploy`]: Run phases, engines and post-deploy hooks
//! - [`error`]: Error types
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! role: www
//! hosts:
//!   - deployer@tunnel.example.com
//! ssh_options:
//!   key_paths: [~/.ssh/merchant_e]
//!   port: 7047
//! api_token: change-me # or DEPLOY_STAGE_API_TOKEN
//! deploy_path: /var/www/merchant_e
//! post_deploy_hook: activate_merchant_e
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{LoadedStage, StageConfig, StageFingerprint, StageLoader, StageSource, StageValidator};
pub use deploy::{DeployEngine, DeployReport, DeployRun, HookRegistry, RunPhase, SshEngine};
pub use error::{ConfigError, DeployError, Result, StageError};
