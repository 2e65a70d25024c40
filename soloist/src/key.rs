//! Coordination key and the names derived from it
//!
//! The same key names both the shared-memory segment and the local socket, so
//! every process of one application family agrees on both without talking.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::error::CoordinationError;

/// Key used when nothing else is configured
pub const DEFAULT_KEY: &str = "soloist";

/// Longest accepted key (shm names and socket paths both have tight limits)
const MAX_KEY_LEN: usize = 64;

/// Stable identifier of one application instance-class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoordinationKey(String);

impl CoordinationKey {
    pub fn new(key: impl Into<String>) -> Result<Self, CoordinationError> {
        let key = key.into();
        let invalid = |reason| CoordinationError::InvalidKey {
            key: key.clone(),
            reason,
        };

        if key.is_empty() {
            return Err(invalid("key is empty"));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(invalid("key is longer than 64 characters"));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(invalid("only ASCII letters, digits, '.', '_' and '-' are allowed"));
        }
        if key.starts_with('.') {
            return Err(invalid("key must not start with '.'"));
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// POSIX shared memory object name for this key
    pub fn segment_name(&self) -> String {
        format!("/{}", self.0)
    }

    /// Socket path for this key inside `runtime_dir`
    pub fn socket_path_in(&self, runtime_dir: &Path) -> PathBuf {
        runtime_dir.join(format!("{}.sock", self.0))
    }
}

impl Default for CoordinationKey {
    fn default() -> Self {
        Self(DEFAULT_KEY.to_string())
    }
}

impl FromStr for CoordinationKey {
    type Err = CoordinationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for CoordinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-user directory that holds the coordination sockets
///
/// Prefers `$XDG_RUNTIME_DIR`, which is private to the user.
pub fn default_runtime_dir() -> PathBuf {
    let dir = dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("soloist");
    debug!(?dir, "default_runtime_dir: resolved");
    dir
}
