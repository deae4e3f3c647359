//! Read-only report on a managed target.

use std::fs;
use std::path::{Path, PathBuf};

use crate::checksum;
use crate::lock::LockGuard;
use crate::paths::last_path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetStatus {
    pub path: PathBuf,
    pub exists: bool,
    pub locked: bool,
    pub target_checksum: Option<String>,
    pub snapshot_checksum: Option<String>,
}

impl TargetStatus {
    /// The snapshot holds exactly what the target holds.
    pub fn snapshot_in_sync(&self) -> bool {
        match (&self.target_checksum, &self.snapshot_checksum) {
            (Some(t), Some(s)) => t == s,
            _ => false,
        }
    }
}

pub fn status(target: &Path) -> TargetStatus {
    let digest_of = |p: &Path| match fs::metadata(p) {
        Ok(meta) if meta.is_file() => fs::read(p).ok().map(|b| checksum::compute(&b)),
        _ => None,
    };

    TargetStatus {
        path: target.to_path_buf(),
        exists: target.exists(),
        // Reported as locked when the marker cannot be checked.
        locked: LockGuard::is_locked(target).unwrap_or(true),
        target_checksum: digest_of(target),
        snapshot_checksum: digest_of(&last_path(target)),
    }
}
