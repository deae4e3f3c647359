//! Write-then-rename file commits.
//!
//! The sequence for a target `T`:
//!
//! 1. create `T`'s parent directories (mode `0755`) if missing
//! 2. write the full content to `T.kvexpress` with the requested mode
//! 3. chown `T.kvexpress` to the resolved owner
//! 4. rename `T.kvexpress` over `T`
//!
//! Step 4 is the commit point. Readers of `T` see either the old file or the
//! complete new one with its final mode and owner, never anything in between.
//!
//! Steps 1-3 produce a [`StagedWrite`]; dropping it without calling
//! [`StagedWrite::commit`] removes the staging file and leaves `T` untouched.
//! Whatever a killed process left at `T.kvexpress` is unlinked by the next
//! write to the same target, which then creates its own file there. After the
//! rename the parent directory is synced so the commit survives a power loss.

use std::fs::{self, DirBuilder, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{ChownPolicy, TargetSpec, DIR_MODE};
use crate::error::ApplyError;
use crate::owner::{OwnerIds, OwnerResolver};
use crate::paths::temp_path;

#[derive(Clone)]
pub struct AtomicFileWriter {
    owners: Arc<dyn OwnerResolver>,
    chown_policy: ChownPolicy,
}

impl std::fmt::Debug for AtomicFileWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicFileWriter")
            .field("chown_policy", &self.chown_policy)
            .finish_non_exhaustive()
    }
}

impl AtomicFileWriter {
    pub fn new(owners: Arc<dyn OwnerResolver>, chown_policy: ChownPolicy) -> Self {
        Self {
            owners,
            chown_policy,
        }
    }

    /// Stage and commit in one go.
    pub fn write(&self, content: &[u8], target: &TargetSpec) -> Result<(), ApplyError> {
        self.stage(content, target)?.commit()
    }

    /// Run steps 1-3. The target is not touched until the returned value is
    /// committed.
    pub fn stage(&self, content: &[u8], target: &TargetSpec) -> Result<StagedWrite, ApplyError> {
        ensure_parent_dir(target.path())?;

        let mut staged = StagedWrite {
            temp: temp_path(target.path()),
            target: target.path.clone(),
            mode: target.mode,
            owner: None,
            committed: false,
        };

        // From here on, an early return drops `staged` and removes the temp file.
        let file = write_temp(&staged.temp, content, target.mode)?;

        match self.apply_owner(&file, &staged.temp, target.owner()) {
            Ok(ids) => staged.owner = Some(ids),
            Err(e) => match self.chown_policy {
                ChownPolicy::Required => return Err(e.logged()),
                ChownPolicy::BestEffort => {
                    tracing::warn!(
                        file = %staged.temp.display(),
                        error = %e,
                        "continuing without ownership change (chown policy: best effort)"
                    );
                }
            },
        }

        file.sync_all().map_err(|source| {
            ApplyError::WriteTemp {
                path: staged.temp.clone(),
                source,
            }
            .logged()
        })?;
        Ok(staged)
    }

    fn apply_owner(&self, file: &File, path: &Path, owner: Option<&str>) -> Result<OwnerIds, ApplyError> {
        let ids = self.owners.resolve(owner)?;
        chown(file, path, ids)?;
        Ok(ids)
    }
}

/// A fully written, chowned staging file waiting to be renamed into place.
#[derive(Debug)]
#[must_use = "dropping a StagedWrite discards the staged content"]
pub struct StagedWrite {
    temp: PathBuf,
    target: PathBuf,
    mode: u32,
    owner: Option<OwnerIds>,
    committed: bool,
}

impl StagedWrite {
    pub fn temp_path(&self) -> &Path {
        &self.temp
    }

    pub fn target_path(&self) -> &Path {
        &self.target
    }

    /// Step 4: atomically replace the target.
    pub fn commit(mut self) -> Result<(), ApplyError> {
        fs::rename(&self.temp, &self.target).map_err(|source| {
            ApplyError::Rename {
                from: self.temp.clone(),
                to: self.target.clone(),
                source,
            }
            .logged()
        })?;
        self.committed = true;

        if let Some(parent) = self.target.parent() {
            // Some filesystems refuse fsync on a directory; the rename has
            // already happened either way.
            if let Err(e) = sync_dir(parent) {
                tracing::warn!(location = %parent.display(), error = %e, "could not sync directory after rename");
            }
        }

        tracing::debug!(
            file_wrote = true,
            location = %self.target.display(),
            permissions = %format!("{:o}", self.mode),
            "committed"
        );
        match self.owner {
            Some(ids) => tracing::debug!(
                file_chown = true,
                location = %self.target.display(),
                owner = ids.uid,
                group = ids.gid,
                "ownership applied"
            ),
            None => tracing::debug!(
                file_chown = false,
                location = %self.target.display(),
                "ownership unchanged"
            ),
        }
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}

fn ensure_parent_dir(target: &Path) -> Result<(), ApplyError> {
    let Some(parent) = target.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() || parent.is_dir() {
        return Ok(());
    }

    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(DIR_MODE);
    }
    #[cfg(not(unix))]
    let _ = DIR_MODE;

    // A regular file anywhere in the chain makes this fail; it is never replaced.
    builder.create(parent).map_err(|source| {
        ApplyError::CreateDir {
            path: parent.to_path_buf(),
            source,
        }
        .logged()
    })
}

/// Make the rename that just happened in `dir` durable.
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

/// Write `content` to a freshly created `temp` with `mode` applied.
///
/// Whatever already sits at `temp` (an orphan from a killed run, or a link
/// planted there) is unlinked first, and the new file is created with
/// `create_new`, so the write never lands anywhere but a new regular file.
fn write_temp(temp: &Path, content: &[u8], mode: u32) -> Result<File, ApplyError> {
    let wrap = |source: std::io::Error| {
        ApplyError::WriteTemp {
            path: temp.to_path_buf(),
            source,
        }
        .logged()
    };

    match fs::remove_file(temp) {
        Ok(()) => tracing::debug!(location = %temp.display(), "removed stale staging file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(wrap(e)),
    }

    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }

    let mut file = opts.open(temp).map_err(wrap)?;
    file.write_all(content).map_err(wrap)?;

    // The open mode is filtered by umask.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))
            .map_err(wrap)?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(file)
}

/// Change ownership through the open handle, never by path.
#[cfg(unix)]
fn chown(file: &File, path: &Path, ids: OwnerIds) -> Result<(), ApplyError> {
    std::os::unix::fs::fchown(file, Some(ids.uid), Some(ids.gid)).map_err(|source| {
        ApplyError::Chown {
            path: path.to_path_buf(),
            uid: ids.uid,
            gid: ids.gid,
            source,
        }
    })
}

#[cfg(not(unix))]
fn chown(_file: &File, _path: &Path, _ids: OwnerIds) -> Result<(), ApplyError> {
    Ok(())
}
