//! Error types for stage loading and deploy runs.
//!
//! Load-time problems surface as [`ConfigError`] and always name the offending
//! field. Run-time problems reported by a deploy engine surface as [`DeployError`].
//! Neither ever carries the API token.

use std::path::PathBuf;
use thiserror::Error;

use crate::deploy::RunPhase;

/// The main error type for the deploy-stage system.
#[derive(Debug, Error)]
pub enum StageError {
    /// Stage configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Deploy run errors.
    #[error("Deploy error: {0}")]
    Deploy(#[from] DeployError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while loading or validating a stage descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The stage file was not found.
    #[error("Stage file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The stage source could not be parsed.
    #[error("Failed to parse stage: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// A required field is absent or empty.
    #[error("Missing required field: {field}")]
    MissingField {
        /// Path of the missing field (e.g. `hosts[0].user`).
        field: String,
    },

    /// The SSH port is outside 1-65535.
    #[error("Invalid SSH port {port}: must be between 1 and 65535")]
    InvalidPort {
        /// The rejected value, as written in the source.
        port: i128,
    },

    /// The hosts sequence is present but empty.
    #[error("No hosts defined for stage")]
    NoHosts,

    /// A host does not carry the stage role.
    #[error("Host '{host}' does not list stage role '{role}' in its roles")]
    RoleMismatch {
        /// The host that is missing the role.
        host: String,
        /// The stage role.
        role: String,
    },

    /// A host name or user would be read as a command-line option.
    #[error("Invalid {field} '{value}': must not start with '-'")]
    InvalidHostField {
        /// Path of the field (e.g. `hosts[0].user`).
        field: String,
        /// The rejected value.
        value: String,
    },

    /// The deploy path is not absolute.
    #[error("Deploy path must be absolute: {path}")]
    RelativeDeployPath {
        /// The rejected path.
        path: String,
    },

    /// The post-deploy hook name is not a valid identifier.
    #[error("Invalid post-deploy hook name: '{name}'")]
    InvalidHookName {
        /// The rejected name.
        name: String,
    },

    /// A `user@hostname` host shorthand could not be split.
    #[error("Invalid host shorthand '{spec}': expected user@hostname")]
    InvalidHostShorthand {
        /// The rejected shorthand.
        spec: String,
    },
}

/// Errors raised during a deploy run.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeployError {
    /// The stage names a hook that is not registered with the engine.
    #[error("Post-deploy hook '{hook}' is not registered")]
    UnknownHook {
        /// The unresolved hook name.
        hook: String,
    },

    /// A host could not be reached.
    #[error("Failed to connect to {host}: {message}")]
    ConnectionFailed {
        /// Host in `user@hostname` form.
        host: String,
        /// Description of the failure.
        message: String,
    },

    /// The release workflow failed on a host.
    #[error("Release failed on {host}: {message}")]
    ReleaseFailed {
        /// Host in `user@hostname` form.
        host: String,
        /// Description of the failure.
        message: String,
    },

    /// The run was aborted; remaining hosts were skipped and no hook ran.
    #[error("Deploy aborted while {phase} on {host}: {reason}")]
    Aborted {
        /// Phase in which the run failed.
        phase: RunPhase,
        /// Host that failed.
        host: String,
        /// Underlying failure.
        reason: String,
    },

    /// The post-deploy hook ran but failed.
    #[error("Post-deploy hook '{hook}' failed: {reason}")]
    HookFailed {
        /// Hook name.
        hook: String,
        /// Description of the failure.
        reason: String,
    },

    /// A remote command did not finish in time.
    #[error("Timed out after {secs}s waiting for {host}")]
    Timeout {
        /// Host in `user@hostname` form.
        host: String,
        /// Timeout that elapsed.
        secs: u64,
    },
}

/// Result type alias for deploy-stage operations.
pub type Result<T> = std::result::Result<T, StageError>;

impl StageError {
    /// Returns true if retrying the same operation could succeed.
    ///
    /// Configuration errors never are: the source must be fixed and reloaded.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Deploy(DeployError::ConnectionFailed { .. } | DeployError::Timeout { .. })
        )
    }

    /// Returns the configuration error, if this is one.
    #[must_use]
    pub const fn as_config(&self) -> Option<&ConfigError> {
        match self {
            Self::Config(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the deploy error, if this is one.
    #[must_use]
    pub const fn as_deploy(&self) -> Option<&DeployError> {
        match self {
            Self::Deploy(e) => Some(e),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a missing-field error.
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Creates a parse error without a location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }

    /// Returns the field this error refers to, when it refers to one.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingField { field } | Self::InvalidHostField { field, .. } => {
                Some(field.as_str())
            }
            Self::InvalidPort { .. } => Some("ssh_options.port"),
            Self::NoHosts => Some("hosts"),
            Self::RelativeDeployPath { .. } => Some("deploy_path"),
            Self::InvalidHookName { .. } => Some("post_deploy_hook"),
            _ => None,
        }
    }
}
