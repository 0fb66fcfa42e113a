//! Stage loading from files, literals, records and the environment.
//!
//! [`StageLoader::load`] is the single entry point: it reads the chosen
//! [`StageSource`] into a [`RawStage`], applies environment overrides for file
//! sources, and hands the result to the [`StageValidator`].

use crate::error::{ConfigError, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::spec::{parse_port, RawHost, RawSshOptions, RawStage};
use super::validator::{LoadedStage, StageValidator};

/// Environment variable holding the stage role.
pub const ENV_ROLE: &str = "DEPLOY_STAGE_ROLE";
/// Environment variable holding comma-separated `user@hostname` hosts.
pub const ENV_HOSTS: &str = "DEPLOY_STAGE_HOSTS";
/// Environment variable holding comma-separated SSH key paths.
pub const ENV_SSH_KEYS: &str = "DEPLOY_STAGE_SSH_KEYS";
/// Environment variable holding the SSH port.
pub const ENV_SSH_PORT: &str = "DEPLOY_STAGE_SSH_PORT";
/// Environment variable holding the API token.
pub const ENV_API_TOKEN: &str = "DEPLOY_STAGE_API_TOKEN";
/// Environment variable holding the deploy path.
pub const ENV_DEPLOY_PATH: &str = "DEPLOY_STAGE_DEPLOY_PATH";
/// Environment variable holding the post-deploy hook name.
pub const ENV_POST_DEPLOY_HOOK: &str = "DEPLOY_STAGE_POST_DEPLOY_HOOK";

/// Looks up an environment variable by name.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Where a stage descriptor comes from.
#[derive(Debug, Clone)]
pub enum StageSource {
    /// A YAML stage file.
    File(PathBuf),
    /// An embedded YAML literal.
    Yaml(String),
    /// An in-memory record.
    Record(RawStage),
    /// `DEPLOY_STAGE_*` environment variables.
    Env,
}

/// Loader producing validated stages.
#[derive(Clone)]
pub struct StageLoader {
    /// Base path for relative key paths and `.env` lookup.
    base_path: Option<PathBuf>,
    /// Environment lookup.
    env: EnvLookup,
}

impl fmt::Debug for StageLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageLoader")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl Default for StageLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl StageLoader {
    /// Creates a loader reading the process environment.
    #[must_use]
    pub fn new() -> Self {
        let env: EnvLookup = Arc::new(|name: &str| std::env::var(name).ok());
        Self {
            base_path: None,
            env,
        }
    }

    /// Sets the base path (the project root).
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Replaces the environment lookup.
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    /// Loads and validates a stage.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or parsed, or if
    /// validation fails.
    pub fn load(&self, source: StageSource) -> Result<LoadedStage> {
        let raw = match source {
            StageSource::File(path) => {
                let mut raw = self.load_file(&path)?;
                self.apply_env_overrides(&mut raw)?;
                raw
            }
            StageSource::Yaml(content) => self.parse_yaml(&content, None)?,
            StageSource::Record(raw) => raw,
            StageSource::Env => self.raw_from_env()?,
        };

        self.validator().validate(&raw)
    }

    /// Reads a YAML stage file without validating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<RawStage> {
        let path = path.as_ref();
        info!("Loading stage from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a YAML stage without validating it.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<RawStage> {
        debug!("Parsing stage YAML");

        let raw: RawStage = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;

        Ok(raw)
    }

    /// Applies `DEPLOY_STAGE_*` overrides to a raw stage.
    ///
    /// Only the settings that typically differ per machine are overridable:
    /// token, deploy path, port and hook.
    ///
    /// # Errors
    ///
    /// Returns an error if the port override is not an integer.
    pub fn apply_env_overrides(&self, raw: &mut RawStage) -> Result<()> {
        if let Some(token) = self.var(ENV_API_TOKEN) {
            debug!("Overriding api_token from environment");
            raw.api_token = Some(token);
        }

        if let Some(path) = self.var(ENV_DEPLOY_PATH) {
            debug!("Overriding deploy_path from environment");
            raw.deploy_path = Some(path);
        }

        if let Some(port) = self.port_var()? {
            debug!("Overriding ssh_options.port from environment");
            raw.ssh_options.get_or_insert_with(RawSshOptions::default).port = Some(port);
        }

        if let Some(hook) = self.var(ENV_POST_DEPLOY_HOOK) {
            debug!("Overriding post_deploy_hook from environment");
            raw.post_deploy_hook = Some(hook);
        }

        Ok(())
    }

    /// Builds a raw stage from `DEPLOY_STAGE_*` variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the port variable is not an integer.
    pub fn raw_from_env(&self) -> Result<RawStage> {
        debug!("Building stage from environment");

        let hosts: Option<Vec<RawHost>> = self
            .var(ENV_HOSTS)
            .map(|v| split_list(&v).map(RawHost::Shorthand).collect());
        let key_paths: Option<Vec<String>> =
            self.var(ENV_SSH_KEYS).map(|v| split_list(&v).collect());
        let port = self.port_var()?;

        let ssh_options = if key_paths.is_some() || port.is_some() {
            Some(RawSshOptions { key_paths, port })
        } else {
            None
        };

        Ok(RawStage {
            role: self.var(ENV_ROLE),
            hosts,
            ssh_options,
            api_token: self.var(ENV_API_TOKEN),
            deploy_path: self.var(ENV_DEPLOY_PATH),
            post_deploy_hook: self.var(ENV_POST_DEPLOY_HOOK),
            hooks: std::collections::BTreeMap::new(),
        })
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Returns a validator resolving key paths against the base path.
    fn validator(&self) -> StageValidator {
        match &self.base_path {
            Some(base) => StageValidator::new().with_key_base(base),
            None => StageValidator::new(),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.env)(name)
    }

    fn port_var(&self) -> Result<Option<i128>> {
        let Some(value) = self.var(ENV_SSH_PORT) else {
            return Ok(None);
        };

        parse_port(&value).map(Some).ok_or_else(|| {
            ConfigError::ParseError {
                message: format!("{ENV_SSH_PORT} is not an integer: {value}"),
                location: Some(String::from("environment")),
            }
            .into()
        })
    }
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// File name patterns searched for a stage, relative to each directory.
pub const STAGE_FILE_PATTERNS: &[&str] = &[
    "config/deploy/{stage}.yaml",
    "config/deploy/{stage}.yml",
    "{stage}.deploy.yaml",
    "{stage}.deploy.yml",
];

/// Checks that a stage name is a plain file stem.
///
/// # Errors
///
/// Returns an error if the name is empty, starts with `.` or contains a path
/// separator.
pub fn validate_stage_name(stage: &str) -> Result<()> {
    if stage.is_empty() || stage.contains(['/', '\\']) || stage.starts_with('.') {
        return Err(ConfigError::parse(format!("Invalid stage name: '{stage}'")).into());
    }
    Ok(())
}

/// Returns where `init` writes the stage file under `project_dir`.
///
/// # Errors
///
/// Returns an error if the stage name is not a plain name.
pub fn stage_file_path(project_dir: &Path, stage: &str) -> Result<PathBuf> {
    validate_stage_name(stage)?;
    Ok(project_dir.join(STAGE_FILE_PATTERNS[0].replace("{stage}", stage)))
}

/// Finds a stage file in `start_dir` or its parents.
///
/// # Errors
///
/// Returns an error if the stage name is not a plain name or no file is found.
pub fn find_stage_file(start_dir: impl AsRef<Path>, stage: &str) -> Result<PathBuf> {
    validate_stage_name(stage)?;

    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for pattern in STAGE_FILE_PATTERNS {
            let candidate = current.join(pattern.replace("{stage}", stage));
            if candidate.is_file() {
                info!("Found stage file: {}", candidate.display());
                return Ok(candidate);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(STAGE_FILE_PATTERNS[0].replace("{stage}", stage)),
    }
    .into())
}

/// Returns the project root for a stage file.
///
/// Files under `config/deploy/` belong to the project two levels up; any other
/// file belongs to its own directory.
#[must_use]
pub fn project_root(stage_file: &Path) -> PathBuf {
    let parent = stage_file.parent().unwrap_or_else(|| Path::new("."));

    if parent.ends_with("config/deploy") {
        parent
            .parent()
            .and_then(Path::parent)
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    } else {
        parent.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HookName;
    use crate::error::StageError;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const MERCHANT_STAGE: &str = r"
role: www
hosts:
  - hostname: tunnel.example.com
    user: deployer
    roles: [www]
sshOptions:
  port: 7047
apiToken: X
deployPath: /var/www/app
postDeployHook: activate_merchant_e
";

    fn loader() -> StageLoader {
        StageLoader::new().with_env(|_| None)
    }

    fn env_loader(vars: &[(&'static str, &'static str)]) -> StageLoader {
        let vars: HashMap<&str, &str> = vars.iter().copied().collect();
        StageLoader::new().with_env(move |name| vars.get(name).map(|v| (*v).to_string()))
    }

    #[test]
    fn test_parse_merchant_stage() {
        let loaded = loader()
            .load(StageSource::Yaml(MERCHANT_STAGE.to_string()))
            .unwrap();
        let config = loaded.config();

        assert_eq!(config.role(), "www");
        assert_eq!(config.host_addresses(), vec!["deployer@tunnel.example.com"]);
        assert_eq!(config.ssh_options().port(), Some(7047));
        assert!(config.ssh_options().key_paths().is_none());
        assert_eq!(config.api_token().expose(), "X");
        assert_eq!(config.deploy_path(), Path::new("/var/www/app"));
        assert_eq!(
            config.post_deploy_hook(),
            Some(&HookName::parse("activate_merchant_e").unwrap())
        );
    }

    #[test]
    fn test_snake_case_keys() {
        let yaml = r"
role: www
hosts: [deployer@tunnel.example.com]
ssh_options:
  port: 2222
api_token: X
deploy_path: /var/www/app
";
        let loaded = loader().load(StageSource::Yaml(yaml.to_string())).unwrap();
        assert_eq!(loaded.config().ssh_options().port(), Some(2222));
    }

    #[test]
    fn test_load_is_idempotent() {
        let first = loader()
            .load(StageSource::Yaml(MERCHANT_STAGE.to_string()))
            .unwrap();
        let second = loader()
            .load(StageSource::Yaml(MERCHANT_STAGE.to_string()))
            .unwrap();
        assert_eq!(first.config(), second.config());
    }

    #[test]
    fn test_key_paths_filtered_by_existence() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, "key").unwrap();

        let yaml = MERCHANT_STAGE.replace(
            "sshOptions:\n  port: 7047",
            &format!(
                "sshOptions:\n  port: 7047\n  keyPaths: [\"{}\", \"{}\"]",
                a.display(),
                b.display()
            ),
        );

        let loaded = loader().load(StageSource::Yaml(yaml)).unwrap();
        assert_eq!(
            loaded.config().ssh_options().key_paths(),
            Some(&[a][..])
        );
        assert!(loaded.warnings().iter().any(|w| w.contains("key_paths")));
    }

    #[test]
    fn test_load_file_not_found() {
        let err = loader()
            .load(StageSource::File(PathBuf::from("/nonexistent/stage.yaml")))
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Config(ConfigError::FileNotFound { .. })
        ));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = loader()
            .load(StageSource::Yaml(String::from("role: [unclosed")))
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Config(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_oversized_yaml_port_is_invalid_port() {
        for (port, expected) in [
            ("99999999999999999999", 99_999_999_999_999_999_999_i128),
            ("-1", -1),
            ("70000", 70_000),
        ] {
            let yaml = format!(
                "role: www\nhosts: [deployer@h]\nssh_options: {{ port: {port} }}\napi_token: X\ndeploy_path: /var/www/app\n"
            );
            let err = loader().load(StageSource::Yaml(yaml)).unwrap_err();
            assert_eq!(
                err.as_config(),
                Some(&ConfigError::InvalidPort { port: expected })
            );
        }
    }

    #[test]
    fn test_oversized_env_port_is_invalid_port() {
        let err = env_loader(&[
            (ENV_ROLE, "www"),
            (ENV_HOSTS, "deployer@h"),
            (ENV_SSH_PORT, "99999999999999999999"),
            (ENV_API_TOKEN, "X"),
            (ENV_DEPLOY_PATH, "/var/www/app"),
        ])
        .load(StageSource::Env)
        .unwrap_err();
        assert_eq!(
            err.as_config(),
            Some(&ConfigError::InvalidPort {
                port: 99_999_999_999_999_999_999
            })
        );
    }

    #[test]
    fn test_file_env_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("merchant.deploy.yaml");
        std::fs::write(&path, MERCHANT_STAGE).unwrap();

        let loaded = env_loader(&[
            (ENV_API_TOKEN, "from-env"),
            (ENV_SSH_PORT, "2200"),
        ])
        .load(StageSource::File(path))
        .unwrap();

        assert_eq!(loaded.config().api_token().expose(), "from-env");
        assert_eq!(loaded.config().ssh_options().port(), Some(2200));
        assert_eq!(loaded.config().deploy_path(), Path::new("/var/www/app"));
    }

    #[test]
    fn test_env_source() {
        let loaded = env_loader(&[
            (ENV_ROLE, "www"),
            (ENV_HOSTS, "deployer@a.example.com, deployer@b.example.com"),
            (ENV_API_TOKEN, "X"),
            (ENV_DEPLOY_PATH, "/var/www/app"),
            (ENV_SSH_PORT, "7047"),
        ])
        .load(StageSource::Env)
        .unwrap();

        let config = loaded.config();
        assert_eq!(
            config.host_addresses(),
            vec!["deployer@a.example.com", "deployer@b.example.com"]
        );
        assert_eq!(config.ssh_options().port(), Some(7047));
    }

    #[test]
    fn test_env_source_missing_token() {
        let err = env_loader(&[
            (ENV_ROLE, "www"),
            (ENV_HOSTS, "deployer@a.example.com"),
            (ENV_DEPLOY_PATH, "/var/www/app"),
        ])
        .load(StageSource::Env)
        .unwrap_err();

        assert_eq!(err.as_config(), Some(&ConfigError::missing("api_token")));
    }

    #[test]
    fn test_env_port_not_integer() {
        let err = env_loader(&[(ENV_SSH_PORT, "ssh")])
            .load(StageSource::Env)
            .unwrap_err();
        assert!(matches!(
            err,
            StageError::Config(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_find_stage_file_walks_up() {
        let dir = TempDir::new().unwrap();
        let deploy_dir = dir.path().join("config/deploy");
        std::fs::create_dir_all(&deploy_dir).unwrap();
        std::fs::write(deploy_dir.join("merchant_e.yaml"), MERCHANT_STAGE).unwrap();
        let nested = dir.path().join("app/src");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_stage_file(&nested, "merchant_e").unwrap();
        assert_eq!(found, deploy_dir.join("merchant_e.yaml"));
    }

    #[test]
    fn test_find_stage_file_rejects_paths() {
        assert!(find_stage_file(".", "../etc/passwd").is_err());
        assert!(find_stage_file(".", "").is_err());
    }

    #[test]
    fn test_stage_file_path_stays_in_project() {
        let root = Path::new("/srv/app");
        assert_eq!(
            stage_file_path(root, "merchant_e").unwrap(),
            PathBuf::from("/srv/app/config/deploy/merchant_e.yaml")
        );

        for name in ["../../x", "a/b", "..", ".hidden", "", "a\\b"] {
            assert!(stage_file_path(root, name).is_err(), "accepted {name:?}");
        }
    }

    #[test]
    fn test_project_root() {
        assert_eq!(
            project_root(Path::new("/srv/app/config/deploy/merchant_e.yaml")),
            PathBuf::from("/srv/app")
        );
        assert_eq!(
            project_root(Path::new("/srv/app/merchant_e.deploy.yaml")),
            PathBuf::from("/srv/app")
        );
    }

    #[test]
    fn test_load_dotenv_from_base_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "DEPLOY_STAGE_DOTENV_TEST_MARKER=loaded\n",
        )
        .unwrap();

        StageLoader::new()
            .with_base_path(dir.path())
            .load_dotenv()
            .unwrap();
        assert_eq!(
            std::env::var("DEPLOY_STAGE_DOTENV_TEST_MARKER").as_deref(),
            Ok("loaded")
        );
    }

    #[test]
    fn test_load_dotenv_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(StageLoader::new().with_base_path(dir.path()).load_dotenv().is_ok());
    }
}
