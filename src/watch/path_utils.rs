// src/watch/path_utils.rs

//! Utility functions for path handling in the watcher.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Rebuild the full path of a change record from the watch root and the
/// record's relative name.
///
/// - A trailing `/` on `root` is stripped.
/// - A leading `./` on `name` is stripped.
/// - An empty side yields the other side unchanged (a watch on a plain file
///   reports records without a name).
pub fn join_event_path(root: &Path, name: Option<&OsStr>) -> PathBuf {
    let root = root.as_os_str().as_bytes();
    let name = name.map(OsStr::as_bytes).unwrap_or_default();

    if root.is_empty() || name.is_empty() {
        let mut joined = root.to_vec();
        joined.extend_from_slice(name);
        return PathBuf::from(OsStr::from_bytes(&joined));
    }

    let root = root.strip_suffix(b"/").unwrap_or(root);
    let name = name.strip_prefix(b"./").unwrap_or(name);

    let mut joined = Vec::with_capacity(root.len() + 1 + name.len());
    joined.extend_from_slice(root);
    joined.push(b'/');
    joined.extend_from_slice(name);
    PathBuf::from(OsStr::from_bytes(&joined))
}

/// Resolve `path` to its canonical absolute form.
///
/// Fails when the path does not exist; callers treat that as a setup error.
pub fn canonical(path: impl AsRef<Path>) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(path.as_ref())
}
