//! Stage configuration module.
//!
//! This module handles everything needed to turn a stage descriptor into a
//! validated [`StageConfig`]:
//! - Loading from YAML files, literals, records or the environment
//! - Validation of required fields, ports, roles and hook names
//! - Filtering SSH key paths by existence at load time
//! - Fingerprinting stages for change detection

mod spec;
mod parser;
mod validator;
mod keys;
mod hash;

pub use spec::{
    ApiToken, HookDefinition, HookName, HostConfig, RawHost, RawHostEntry, RawSshOptions,
    RawStage, SshOptions, StageConfig, DEFAULT_SSH_PORT,
};
pub use parser::{
    find_stage_file, project_root, stage_file_path, validate_stage_name, EnvLookup, StageLoader,
    StageSource, ENV_API_TOKEN, ENV_DEPLOY_PATH, ENV_HOSTS, ENV_POST_DEPLOY_HOOK, ENV_ROLE,
    ENV_SSH_KEYS, ENV_SSH_PORT, STAGE_FILE_PATTERNS,
};
pub use validator::{LoadedStage, StageValidator};
pub use keys::{resolve_key_path, select_existing_keys, KeyPathSelection};
pub use hash::StageFingerprint;
