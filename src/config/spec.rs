//! Stage descriptor types.
//!
//! Two layers live here. The `Raw*` types mirror a stage file as written, with
//! every field optional so that a missing value can be reported by name instead
//! of failing the parse. [`StageConfig`] and friends are the validated, immutable
//! result handed to a deploy engine.

use serde::de::{self, Unexpected, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Port used by engines when the stage does not set one.
pub const DEFAULT_SSH_PORT: u16 = 22;

// ============================================================================
// Raw (as written) types
// ============================================================================

/// A stage descriptor exactly as read from its source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawStage {
    /// Role label grouping the hosts.
    #[serde(default)]
    pub role: Option<String>,
    /// Target hosts.
    #[serde(default)]
    pub hosts: Option<Vec<RawHost>>,
    /// SSH connection options.
    #[serde(default, alias = "sshOptions")]
    pub ssh_options: Option<RawSshOptions>,
    /// API token handed to the deployed application.
    #[serde(default, alias = "apiToken")]
    pub api_token: Option<String>,
    /// Absolute path the release is deployed to.
    #[serde(default, alias = "deployPath", alias = "deploy_to")]
    pub deploy_path: Option<String>,
    /// Name of the hook to run after a successful deploy.
    #[serde(default, alias = "postDeployHook")]
    pub post_deploy_hook: Option<String>,
    /// Hooks declared alongside the stage, keyed by name.
    #[serde(default)]
    pub hooks: BTreeMap<String, HookDefinition>,
}

/// A host entry as written: either a mapping or `user@hostname`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RawHost {
    /// `user@hostname` shorthand; implies the stage role.
    Shorthand(String),
    /// Explicit host mapping.
    Entry(RawHostEntry),
}

/// Explicit host mapping as written.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawHostEntry {
    /// Host name or address.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Remote login user.
    #[serde(default)]
    pub user: Option<String>,
    /// Roles this host serves.
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

/// SSH options as written.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawSshOptions {
    /// Candidate private key paths.
    #[serde(default, alias = "keyPaths", alias = "keys")]
    pub key_paths: Option<Vec<String>>,
    /// SSH port. Wider than `u16` so out-of-range values reach validation.
    #[serde(default, deserialize_with = "deserialize_port")]
    pub port: Option<i128>,
}

/// A hook declared in the stage file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HookDefinition {
    /// Program and arguments to run locally after activation.
    #[serde(default)]
    pub command: Vec<String>,
    /// Extra environment for the command.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Parses an integer port, saturating values too wide for `i128`.
///
/// Returns `None` if `value` is not an optionally signed run of digits.
pub(crate) fn parse_port(value: &str) -> Option<i128> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(value.parse::<i128>().unwrap_or(if negative { i128::MIN } else { i128::MAX }))
}

/// Reads any integer as a port so range errors are reported by validation.
fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i128>, D::Error> {
    struct PortVisitor;

    impl<'de> Visitor<'de> for PortVisitor {
        type Value = Option<i128>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer port")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(self)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(i128::from(v)))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(i128::from(v)))
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<Self::Value, E> {
            Ok(Some(i128::try_from(v).unwrap_or(i128::MAX)))
        }

        // Integers wider than u128 arrive as floats.
        #[allow(clippy::cast_possible_truncation)]
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            if v.is_finite() && v.fract() == 0.0 {
                Ok(Some(v as i128))
            } else {
                Err(E::invalid_value(Unexpected::Float(v), &self))
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse_port(v)
                .map(Some)
                .ok_or_else(|| E::invalid_value(Unexpected::Str(v), &self))
        }
    }

    deserializer.deserialize_option(PortVisitor)
}

// ============================================================================
// Validated types
// ============================================================================

/// A validated, immutable stage descriptor.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StageConfig {
    role: String,
    hosts: Vec<HostConfig>,
    ssh_options: SshOptions,
    api_token: ApiToken,
    deploy_path: PathBuf,
    post_deploy_hook: Option<HookName>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    hooks: BTreeMap<HookName, HookDefinition>,
}

/// A validated target host.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HostConfig {
    hostname: String,
    user: String,
    roles: BTreeSet<String>,
}

/// Validated SSH options.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SshOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    key_paths: Option<Vec<PathBuf>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
}

/// An API token. Never printed, logged or serialized in clear.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiToken(String);

/// Identifier naming a post-deploy hook.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct HookName(String);

const REDACTED: &str = "[redacted]";

impl StageConfig {
    pub(crate) const fn new(
        role: String,
        hosts: Vec<HostConfig>,
        ssh_options: SshOptions,
        api_token: ApiToken,
        deploy_path: PathBuf,
        post_deploy_hook: Option<HookName>,
        hooks: BTreeMap<HookName, HookDefinition>,
    ) -> Self {
        Self {
            role,
            hosts,
            ssh_options,
            api_token,
            deploy_path,
            post_deploy_hook,
            hooks,
        }
    }

    /// Returns the stage role.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Returns the hosts in source order.
    #[must_use]
    pub fn hosts(&self) -> &[HostConfig] {
        &self.hosts
    }

    /// Returns the SSH options.
    #[must_use]
    pub const fn ssh_options(&self) -> &SshOptions {
        &self.ssh_options
    }

    /// Returns the API token.
    #[must_use]
    pub const fn api_token(&self) -> &ApiToken {
        &self.api_token
    }

    /// Returns the absolute deploy path.
    #[must_use]
    pub fn deploy_path(&self) -> &Path {
        &self.deploy_path
    }

    /// Returns the post-deploy hook name, if any.
    #[must_use]
    pub const fn post_deploy_hook(&self) -> Option<&HookName> {
        self.post_deploy_hook.as_ref()
    }

    /// Returns the hooks declared in the stage source.
    #[must_use]
    pub const fn hooks(&self) -> &BTreeMap<HookName, HookDefinition> {
        &self.hooks
    }

    /// Returns `user@hostname` for every host.
    #[must_use]
    pub fn host_addresses(&self) -> Vec<String> {
        self.hosts.iter().map(HostConfig::address).collect()
    }
}

impl HostConfig {
    pub(crate) const fn new(hostname: String, user: String, roles: BTreeSet<String>) -> Self {
        Self {
            hostname,
            user,
            roles,
        }
    }

    /// Returns the host name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Returns the login user.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the roles this host serves.
    #[must_use]
    pub const fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    /// Returns true if the host serves `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Returns the SSH destination (`user@hostname`).
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}@{}", self.user, self.hostname)
    }
}

impl SshOptions {
    pub(crate) const fn new(key_paths: Option<Vec<PathBuf>>, port: Option<u16>) -> Self {
        Self { key_paths, port }
    }

    /// Returns the key paths that existed at load time, if any did.
    #[must_use]
    pub fn key_paths(&self) -> Option<&[PathBuf]> {
        self.key_paths.as_deref()
    }

    /// Returns the configured port.
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns the configured port or [`DEFAULT_SSH_PORT`].
    #[must_use]
    pub const fn effective_port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None => DEFAULT_SSH_PORT,
        }
    }
}

impl ApiToken {
    pub(crate) const fn new(token: String) -> Self {
        Self(token)
    }

    /// Returns the token in clear. Callers must not log the result.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns the token length, for diagnostics that must not reveal it.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the token is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiToken({REDACTED})")
    }
}

impl fmt::Display for ApiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for ApiToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl HookName {
    /// Parses a hook name.
    ///
    /// Names start with a letter or underscore and may contain letters, digits,
    /// `_`, `-`, `.` and `:` (so `deploy:activate` is accepted).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHookName`] if the name is malformed.
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
        let valid_rest =
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'));

        if valid_start && valid_rest {
            Ok(Self(name.to_string()))
        } else {
            Err(ConfigError::InvalidHookName {
                name: name.to_string(),
            })
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HookName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl RawHost {
    /// Splits a `user@hostname` shorthand.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHostShorthand`] if either side is empty.
    pub fn split_shorthand(spec: &str) -> Result<(String, String), ConfigError> {
        match spec.trim().split_once('@') {
            Some((user, hostname)) if !user.is_empty() && !hostname.is_empty() => {
                Ok((user.to_string(), hostname.to_string()))
            }
            _ => Err(ConfigError::InvalidHostShorthand {
                spec: spec.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_name_parse() {
        assert!(HookName::parse("activate_merchant_e").is_ok());
        assert!(HookName::parse("deploy:activate_merchant_e").is_ok());
        assert!(HookName::parse("_restart").is_ok());
    }

    #[test]
    fn test_hook_name_invalid() {
        assert!(HookName::parse("").is_err());
        assert!(HookName::parse("1st").is_err());
        assert!(HookName::parse("rm -rf").is_err());
        assert!(HookName::parse("a;b").is_err());
    }

    #[test]
    fn test_api_token_redacted() {
        let token = ApiToken::new(String::from("CT0wnKJbr3mk"));
        assert_eq!(format!("{token:?}"), "ApiToken([redacted])");
        assert_eq!(token.to_string(), "[redacted]");
        assert_eq!(serde_json::to_string(&token).unwrap(), "\"[redacted]\"");
        assert_eq!(token.expose(), "CT0wnKJbr3mk");
    }

    #[test]
    fn test_split_shorthand() {
        let (user, host) = RawHost::split_shorthand("deployer@tunnel.example.com").unwrap();
        assert_eq!(user, "deployer");
        assert_eq!(host, "tunnel.example.com");

        assert!(RawHost::split_shorthand("tunnel.example.com").is_err());
        assert!(RawHost::split_shorthand("@tunnel.example.com").is_err());
        assert!(RawHost::split_shorthand("deployer@").is_err());
    }

    #[test]
    fn test_raw_host_untagged() {
        let yaml = r#"
- deployer@tunnel.example.com
- hostname: web1.example.com
  user: deployer
  roles: [www]
"#;
        let hosts: Vec<RawHost> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(hosts.len(), 2);
        assert!(matches!(hosts[0], RawHost::Shorthand(_)));
        assert!(matches!(hosts[1], RawHost::Entry(_)));
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("7047"), Some(7047));
        assert_eq!(parse_port(" -1 "), Some(-1));
        assert_eq!(parse_port("9".repeat(60).as_str()), Some(i128::MAX));
        assert_eq!(parse_port("-"), None);
        assert_eq!(parse_port("22a"), None);
    }

    #[test]
    fn test_wide_yaml_ports_are_read() {
        let ssh: RawSshOptions = serde_yaml::from_str("port: 99999999999999999999").unwrap();
        assert_eq!(ssh.port, Some(99_999_999_999_999_999_999));

        let ssh: RawSshOptions = serde_yaml::from_str("port: -5").unwrap();
        assert_eq!(ssh.port, Some(-5));

        let ssh: RawSshOptions = serde_yaml::from_str("port: ~").unwrap();
        assert_eq!(ssh.port, None);

        assert!(serde_yaml::from_str::<RawSshOptions>("port: 22.5").is_err());
    }

    #[test]
    fn test_effective_port_default() {
        assert_eq!(SshOptions::default().effective_port(), DEFAULT_SSH_PORT);
        assert_eq!(SshOptions::new(None, Some(7047)).effective_port(), 7047);
    }
}
