//! Stage fingerprints for change detection.
//!
//! A fingerprint is a SHA-256 over every field of a [`StageConfig`] in a fixed
//! order. Two structurally equal stages always share a fingerprint. The API
//! token only contributes its own digest.

use sha2::{Digest, Sha256};

use super::spec::{HostConfig, StageConfig};

/// Hasher for computing stage fingerprints.
#[derive(Debug, Default)]
pub struct StageFingerprint;

impl StageFingerprint {
    /// Creates a new fingerprint hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the fingerprint of a stage.
    #[must_use]
    pub fn of(&self, config: &StageConfig) -> String {
        let mut hasher = Sha256::new();

        hasher.update(config.role().as_bytes());

        for host in config.hosts() {
            hasher.update(self.hash_host(host).as_bytes());
        }

        // SSH options
        let ssh = config.ssh_options();
        if let Some(port) = ssh.port() {
            hasher.update(port.to_be_bytes());
        }
        for key in ssh.key_paths().unwrap_or_default() {
            hasher.update(key.to_string_lossy().as_bytes());
        }

        hasher.update(Sha256::digest(config.api_token().expose().as_bytes()));
        hasher.update(config.deploy_path().to_string_lossy().as_bytes());

        if let Some(hook) = config.post_deploy_hook() {
            hasher.update(hook.as_str().as_bytes());
        }

        // BTreeMap iteration is already sorted
        for (name, definition) in config.hooks() {
            hasher.update(name.as_str().as_bytes());
            for arg in &definition.command {
                hasher.update(arg.as_bytes());
            }
            for (key, value) in &definition.env {
                hasher.update(key.as_bytes());
                hasher.update(value.as_bytes());
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a fingerprint for a single host.
    #[must_use]
    pub fn hash_host(&self, host: &HostConfig) -> String {
        let mut hasher = Sha256::new();
        hasher.update(host.hostname().as_bytes());
        hasher.update(host.user().as_bytes());
        for role in host.roles() {
            hasher.update(role.as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Returns the first 8 characters of a fingerprint for display.
    #[must_use]
    pub fn short(&self, fingerprint: &str) -> String {
        fingerprint.chars().take(8).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StageLoader, StageSource};

    const STAGE: &str = r"
role: www
hosts:
  - deployer@tunnel.example.com
api_token: secret
deploy_path: /var/www/app
";

    fn load(yaml: &str) -> StageConfig {
        StageLoader::new()
            .with_env(|_| None)
            .load(StageSource::Yaml(yaml.to_string()))
            .unwrap()
            .into_config()
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let hasher = StageFingerprint::new();
        assert_eq!(hasher.of(&load(STAGE)), hasher.of(&load(STAGE)));
    }

    #[test]
    fn test_token_changes_fingerprint() {
        let hasher = StageFingerprint::new();
        let other = STAGE.replace("secret", "rotated");
        assert_ne!(hasher.of(&load(STAGE)), hasher.of(&load(&other)));
    }

    #[test]
    fn test_fingerprint_hides_token() {
        let fingerprint = StageFingerprint::new().of(&load(STAGE));
        assert!(!fingerprint.contains("secret"));
        assert_eq!(fingerprint.len(), 64);
    }

    #[test]
    fn test_short() {
        let hasher = StageFingerprint::new();
        assert_eq!(hasher.short("abcdef1234567890"), "abcdef12");
    }
}
