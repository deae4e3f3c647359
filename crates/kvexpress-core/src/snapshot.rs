//! `T.last`: the content of the last successful commit.
//!
//! Bookkeeping only. Change detection reads the live target, so a missing,
//! unreadable or stale snapshot never changes what gets written.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::config::TargetSpec;
use crate::error::ApplyError;
use crate::paths::last_path;
use crate::writer::AtomicFileWriter;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    writer: AtomicFileWriter,
}

impl SnapshotStore {
    pub fn new(writer: AtomicFileWriter) -> Self {
        Self { writer }
    }

    /// Previous snapshot, or `None` on first run (or if it cannot be read).
    pub fn load(&self, target: &Path) -> Option<Vec<u8>> {
        let path = last_path(target);
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(file = "last", location = %path.display(), does_not_exist = true);
                None
            }
            Err(e) => {
                tracing::warn!(location = %path.display(), error = %e, "unreadable snapshot ignored");
                None
            }
        }
    }

    /// Replace the snapshot with `content`, using the same write-then-rename
    /// commit (and the same mode/owner) as the target itself.
    pub fn save(&self, target: &TargetSpec, content: &[u8]) -> Result<(), ApplyError> {
        let snapshot = TargetSpec {
            path: last_path(target.path()),
            mode: target.mode,
            owner: target.owner.clone(),
        };
        self.writer.write(content, &snapshot)
    }
}
