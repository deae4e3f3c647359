//! Fatal error taxonomy.
//!
//! Everything here means the environment could not support the operation.
//! Expected operational outcomes (locked, unchanged, bad checksum, short
//! content) live in [`crate::ApplyOutcome`] instead.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("target path must be absolute: {0}")]
    RelativePath(PathBuf),

    #[error("refusing to write over a directory: {0}")]
    TargetIsDirectory(PathBuf),

    #[error("could not create directories `{path}`: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write file `{path}`: {source}")]
    WriteTemp {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not resolve owner `{owner}`: {message}")]
    ResolveOwner { owner: String, message: String },

    #[error("could not chown `{path}` to {uid}:{gid}: {source}")]
    Chown {
        path: PathBuf,
        uid: u32,
        gid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("could not rename `{from}` to `{to}`: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not check lock marker `{path}`: {source}")]
    CheckLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not remove lock marker `{path}`: {message}")]
    RemoveLock { path: PathBuf, message: String },
}

impl ApplyError {
    /// Short step name used in `panic` log lines.
    pub fn step(&self) -> &'static str {
        match self {
            ApplyError::RelativePath(_) => "check_full_path",
            ApplyError::TargetIsDirectory(_) => "check_target",
            ApplyError::CheckLock { .. } => "check_lock",
            ApplyError::CreateDir { .. } => "create_directory",
            ApplyError::WriteTemp { .. } => "write_file",
            ApplyError::ResolveOwner { .. } | ApplyError::Chown { .. } => "chown_file",
            ApplyError::Rename { .. } => "rename_file",
            ApplyError::RemoveLock { .. } => "remove_file",
        }
    }

    /// Log at the point of detection and hand the error back for `?`.
    pub(crate) fn logged(self) -> Self {
        tracing::error!(panic = true, step = self.step(), error = %self, "fatal");
        self
    }
}

/// Failure of the key/value fetch capability.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("transport error fetching `{key}`: {message}")]
    Transport { key: String, message: String },

    #[error("unexpected status {status} fetching `{key}`")]
    Status { key: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
