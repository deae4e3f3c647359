//! Sibling file names for a managed target.
//!
//! Suffixes are appended to the full file name (`app.conf` -> `app.conf.last`),
//! never swapped for an existing extension.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub const TEMP_SUFFIX: &str = "kvexpress";
pub const LAST_SUFFIX: &str = "last";
pub const LOCK_SUFFIX: &str = "locked";

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// `T.kvexpress`: staging file used by the atomic writer.
pub fn temp_path(target: &Path) -> PathBuf {
    with_suffix(target, TEMP_SUFFIX)
}

/// `T.last`: snapshot of the last committed content.
pub fn last_path(target: &Path) -> PathBuf {
    with_suffix(target, LAST_SUFFIX)
}

/// `T.locked`: operator lock marker.
pub fn lock_path(target: &Path) -> PathBuf {
    with_suffix(target, LOCK_SUFFIX)
}
