//! Storage path validation.
//!
//! Every path handed to a backend is relative to that backend's root. This
//! module makes sure it stays that way.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates and normalizes a storage path.
///
/// `.` segments, repeated separators and trailing separators are dropped, and
/// `..` segments are resolved as long as they never climb above the storage
/// root. Leading separators are ignored, so `/series/a.png` and `series/a.png`
/// name the same object.
///
/// Rejected with [`InvalidPath`](ErrorKind::InvalidPath):
/// - paths that resolve to nothing (`""`, `"."`, `"//"`),
/// - paths that escape the root (`"../a.png"`, `"a/../../b"`),
/// - Windows prefixes (`C:\`), NUL bytes and backslashes. Object stores treat
///   a backslash as an ordinary character while Windows treats it as a
///   separator, so the same key would not mean the same thing everywhere.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use shelf_storage::validate_path;
///
/// assert!(validate_path("series/berserk/vol1/ch1/00ff.png").is_ok());
/// assert!(validate_path("../etc/passwd").is_err());
/// assert_eq!(
///     validate_path("series/./berserk//vol1/").unwrap(),
///     Path::new("series/berserk/vol1")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let invalid = || ErrorKind::InvalidPath(original.to_path_buf());
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(segment) => {
                let bytes = segment.as_encoded_bytes();
                if bytes.contains(&0) || bytes.contains(&b'\\') {
                    exn::bail!(invalid());
                }
                components.push(segment);
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(invalid()),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(invalid());
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(invalid());
    }
    Ok(components.into_iter().collect())
}
