//! Storage models.

use std::path::PathBuf;
use time::UtcDateTime;

/// Blob metadata returned by storage backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Relative path from storage root
    pub path: PathBuf,
    /// Blob size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: UtcDateTime,
    /// Content type recorded alongside the blob, if the backend keeps one.
    pub content_type: Option<String>,
}
impl BlobInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: UtcDateTime) -> Self {
        Self {
            path: path.into(),
            size,
            modified,
            content_type: None,
        }
    }

    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }
}
