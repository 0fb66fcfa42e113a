//! SSH key path resolution.
//!
//! A candidate key path is kept only if it names an existing regular file at
//! load time. Missing keys are not an error: the option is simply omitted and
//! the engine falls back to its default authentication.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of checking a list of candidate key paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPathSelection {
    /// Paths that exist, in candidate order.
    pub kept: Vec<PathBuf>,
    /// Paths that were checked and not found.
    pub dropped: Vec<PathBuf>,
}

impl KeyPathSelection {
    /// Returns the kept paths, or `None` when none survived.
    #[must_use]
    pub fn into_option(self) -> Option<Vec<PathBuf>> {
        if self.kept.is_empty() {
            None
        } else {
            Some(self.kept)
        }
    }
}

/// Resolves a candidate key path.
///
/// `~/` expands to the home directory. Relative paths are joined to `base`
/// when one is given. Absolute paths are returned unchanged.
#[must_use]
pub fn resolve_key_path(candidate: &str, base: Option<&Path>) -> PathBuf {
    if let Some(rest) = candidate.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }

    let path = PathBuf::from(candidate);
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

/// Checks each candidate and keeps those that exist as regular files.
#[must_use]
pub fn select_existing_keys(candidates: &[String], base: Option<&Path>) -> KeyPathSelection {
    let mut selection = KeyPathSelection::default();

    for candidate in candidates {
        if candidate.trim().is_empty() {
            continue;
        }

        let path = resolve_key_path(candidate, base);
        if path.is_file() {
            debug!("Using SSH key: {}", path.display());
            selection.kept.push(path);
        } else {
            debug!("SSH key not found, skipping: {}", path.display());
            selection.dropped.push(path);
        }
    }

    selection
}
