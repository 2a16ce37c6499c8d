//! Blob key validation.
//!
//! Blob keys are relative paths such as `alice/202405/<sha256>`. Every
//! backend funnels keys through [`validate`] before touching storage.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a blob key and returns its normalized form.
///
/// Rejects keys that would escape the storage root (`..` beyond the first
/// component), keys containing NUL bytes, Windows prefixes, and keys that
/// normalize to nothing. `.` components, repeated separators and trailing
/// separators are dropped.
///
/// > **Note:** Backslashes and non-UTF8 bytes are passed through untouched.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use cairn_storage::validate_path;
///
/// assert!(validate_path("alice/202405/abc123").is_ok());
/// assert!(validate_path("alice/../bob/202405/abc123").is_ok()); // (never leaves the root)
/// assert!(validate_path("../etc/passwd").is_err());
/// assert!(validate_path("alice/../../b").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(
///     validate_path("./alice//202405/./abc123/").unwrap(),
///     Path::new("alice/202405/abc123")
/// );
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let original = path.as_ref();
    let mut components = Vec::new();
    for component in original.components() {
        match component {
            Component::Normal(segment) => {
                // NUL survives Path::components() on Unix but truncates C strings.
                if segment.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
                components.push(segment)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(original.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
                }
            },
        }
    }
    if components.is_empty() {
        exn::bail!(ErrorKind::InvalidPath(original.to_path_buf()));
    }
    Ok(components.into_iter().collect())
}
