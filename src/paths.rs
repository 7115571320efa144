//! Storage layout under `~/.shellkeeper/`:
//! - `sessions/` - socket handles, one `<name>.sock` per session
//! - `metadata.json` - session metadata records
//! - `config.json` - user configuration
//!
//! `SHELLKEEPER_HOME` relocates the whole tree.

use std::path::{Path, PathBuf};

use crate::error::KeeperError;
use crate::Result;

const KEEPER_DIR: &str = ".shellkeeper";

/// Environment variable overriding the storage root.
pub const HOME_ENV: &str = "SHELLKEEPER_HOME";

/// Resolved storage paths for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperPaths {
    root: PathBuf,
}

impl KeeperPaths {
    /// Paths rooted at `root`.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Paths rooted at `$SHELLKEEPER_HOME`, or `~/.shellkeeper`.
    pub fn resolve() -> Result<Self> {
        if let Some(root) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::under(root));
        }
        let home = dirs::home_dir().ok_or(KeeperError::HomeDirUnavailable)?;
        Ok(Self::under(home.join(KEEPER_DIR)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default socket handle directory.
    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }
}
