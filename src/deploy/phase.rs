//! Deploy run phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of a deploy run.
///
/// Runs move forward only: `Pending -> Connecting -> Releasing -> Activated`,
/// or to `Failed` from any non-terminal phase.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    /// Nothing has been attempted yet.
    #[default]
    Pending,
    /// Establishing SSH connectivity to each host.
    Connecting,
    /// Running the release workflow on each host.
    Releasing,
    /// Every host released; the post-deploy hook fires here.
    Activated,
    /// A host or release failed; the hook never fires.
    Failed,
}

impl RunPhase {
    /// Returns true for `Activated` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Activated | Self::Failed)
    }

    /// Returns the next phase on success, or `None` from a terminal phase.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::Connecting),
            Self::Connecting => Some(Self::Releasing),
            Self::Releasing => Some(Self::Activated),
            Self::Activated | Self::Failed => None,
        }
    }

    /// Returns `Failed` unless the phase is already terminal.
    #[must_use]
    pub const fn fail(self) -> Self {
        if self.is_terminal() { self } else { Self::Failed }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Connecting => "connecting",
            Self::Releasing => "releasing",
            Self::Activated => "activated",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
