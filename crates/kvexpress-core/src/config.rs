//! Explicit configuration handed to the engine and the lock guard.

use std::path::{Path, PathBuf};

use crate::error::ApplyError;

pub const DEFAULT_MODE: u32 = 0o640;
pub const DEFAULT_MIN_LENGTH: usize = 10;
pub const DIR_MODE: u32 = 0o755;

/// A file under management: where it lives, its mode, and who owns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub path: PathBuf,
    pub mode: u32,
    /// User name to own the file. `None` means the user running the process.
    pub owner: Option<String>,
}

impl TargetSpec {
    /// Relative paths are refused; the caller must name the file completely.
    pub fn new(path: impl Into<PathBuf>, mode: u32, owner: Option<String>) -> Result<Self, ApplyError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(ApplyError::RelativePath(path));
        }
        Ok(Self { path, mode, owner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}

/// What to do when ownership cannot be resolved or applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChownPolicy {
    /// Fatal, like every other step of the write.
    #[default]
    Required,
    /// Logged at `warn` and the commit proceeds. For hosts without OS-level
    /// ownership control (containers without CAP_CHOWN, non-POSIX targets).
    BestEffort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyConfig {
    /// Content shorter than this many bytes is rejected.
    pub min_length: usize,
    pub chown_policy: ChownPolicy,
    /// Command run through `sh -c` after a successful commit only.
    pub post_exec: Option<String>,
}

impl Default for ApplyConfig {
    fn default() -> Self {
        Self {
            min_length: DEFAULT_MIN_LENGTH,
            chown_policy: ChownPolicy::default(),
            post_exec: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_target_is_refused() {
        let err = TargetSpec::new("etc/hosts", DEFAULT_MODE, None).unwrap_err();
        assert!(matches!(err, ApplyError::RelativePath(_)));
    }

    #[test]
    fn absolute_target_is_accepted() {
        let t = TargetSpec::new("/etc/hosts", 0o644, Some("root".to_string())).unwrap();
        assert_eq!(t.owner(), Some("root"));
        assert_eq!(t.mode, 0o644);
    }

    #[test]
    fn defaults_match_cli_defaults() {
        let c = ApplyConfig::default();
        assert_eq!(c.min_length, 10);
        assert_eq!(c.chown_policy, ChownPolicy::Required);
        assert!(c.post_exec.is_none());
    }
}
