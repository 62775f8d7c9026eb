//! Specifier resolution.
//!
//! Resolution is purely lexical: a specifier is joined onto the importing
//! unit's directory and `.`/`..` components are folded away. There is no
//! extension inference, no index-file fallback and no package lookup; whether
//! the result exists is discovered by the load that follows.

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use log::trace;

/// Resolve `specifier` against the directory of the unit that declared it
pub fn resolve(unit_dir: &Path, specifier: &str) -> PathBuf {
    let resolved = normalize_lexically(&unit_dir.join(specifier));
    trace!(
        "Resolved '{specifier}' from {} to {}",
        unit_dir.display(),
        resolved.display()
    );
    resolved
}

/// The directory a unit's specifiers are resolved against
pub fn unit_directory(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new(""))
}

/// Make the entry path absolute and normalized, so that every path derived
/// from it is comparable by equality
pub fn entry_path(path: &Path) -> io::Result<PathBuf> {
    Ok(normalize_lexically(&std::path::absolute(path)?))
}

/// Fold `.` and `..` components without touching the filesystem
///
/// `..` at the root stays at the root; leading `..` of a relative path are
/// preserved.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                Some(Component::ParentDir | Component::CurDir) | None => {
                    normalized.push("..");
                }
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    if normalized.as_os_str().is_empty() {
        normalized.push(".");
    }
    normalized
}

/// Path of `path` relative to `base` when it lies below it, for display
pub fn display_relative(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
