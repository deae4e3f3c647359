//! `T.locked`: operator lock marker.
//!
//! The marker's existence is the whole state; its text is instructions for
//! the human who finds it. The apply path only ever observes it. Only
//! [`LockGuard::lock`] creates it and only [`LockGuard::unlock`] removes it.
//!
//! This is an interlock for this tool's own write path, not a security
//! boundary: anyone with access to the directory can delete it.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::config::{LockRequest, TargetSpec};
use crate::error::ApplyError;
use crate::paths::lock_path;
use crate::writer::AtomicFileWriter;

#[derive(Debug, Clone)]
pub struct LockGuard {
    writer: AtomicFileWriter,
}

impl LockGuard {
    pub fn new(writer: AtomicFileWriter) -> Self {
        Self { writer }
    }

    /// Whether `T.locked` exists. Only a definite "no such file" counts as
    /// unlocked; any other stat failure is an error.
    pub fn is_locked(target: &Path) -> Result<bool, ApplyError> {
        let marker = lock_path(target);
        match fs::symlink_metadata(&marker) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ApplyError::CheckLock {
                path: marker,
                source,
            }),
        }
    }

    /// Create the marker for `target`. Returns `false` if it already existed,
    /// in which case nothing is written.
    ///
    /// `target.mode` and `target.owner` are applied to the marker file.
    pub fn lock(&self, target: &TargetSpec, request: &LockRequest) -> Result<bool, ApplyError> {
        let marker = lock_path(target.path());
        if Self::is_locked(target.path()).map_err(ApplyError::logged)? {
            tracing::info!(file = "locked", location = %marker.display(), does_not_exist = false, "already locked");
            return Ok(false);
        }
        tracing::debug!(file = "locked", location = %marker.display(), does_not_exist = true);

        let text = lock_marker_text(target.path(), &request.reason);
        let marker_file = TargetSpec {
            path: marker,
            mode: target.mode,
            owner: target.owner.clone(),
        };
        self.writer.write(text.as_bytes(), &marker_file)?;
        tracing::info!(location = %target.path().display(), reason = %request.reason, "locked");
        Ok(true)
    }

    /// Remove the marker for `target`. Returns `false` if there was none.
    ///
    /// A directory at the marker path is refused rather than deleted.
    pub fn unlock(target: &Path) -> Result<bool, ApplyError> {
        let marker = lock_path(target);
        let meta = match fs::symlink_metadata(&marker) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(location = %marker.display(), "not locked");
                return Ok(false);
            }
            Err(e) => {
                return Err(ApplyError::RemoveLock {
                    path: marker,
                    message: e.to_string(),
                }
                .logged())
            }
        };
        if meta.is_dir() {
            return Err(ApplyError::RemoveLock {
                path: marker,
                message: "is a directory".to_string(),
            }
            .logged());
        }

        fs::remove_file(&marker).map_err(|e| {
            ApplyError::RemoveLock {
                path: marker.clone(),
                message: e.to_string(),
            }
            .logged()
        })?;
        tracing::info!(location = %marker.display(), "removed");
        Ok(true)
    }
}

fn lock_marker_text(target: &Path, reason: &str) -> String {
    let t = target.display();
    format!(
        "To unlock '{t}' and allow kvexpress to write again:\n\n\
         sudo kvexpress unlock -f {t}\n\n\
         Reason Locked: {reason}\n\n"
    )
}
