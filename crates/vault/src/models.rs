//! Requests and results of [`Vault`](crate::Vault) operations.
//!
//! Results derive `Serialize` so that callers can hand them straight to a
//! wire format; timestamps serialize as Unix seconds.

use crate::error::Result;
use bytes::Bytes;
use cairn_metadata::{File, FileVersion};
use derive_more::Display;
use futures::Stream;
use serde::Serialize;
use std::pin::Pin;
use time::UtcDateTime;

mod unix_seconds {
    use serde::Serializer;
    use time::UtcDateTime;

    pub fn serialize<S: Serializer>(at: &UtcDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(at.unix_timestamp())
    }
}

/// A file submitted for storage. The payload is fully buffered.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub owner: String,
    pub file_name: String,
    /// Declared file type; defaults to the lowercase extension of `file_name`.
    pub file_type: Option<String>,
    /// Declared content type; only used when the payload can't be sniffed.
    pub content_type: Option<String>,
    /// Comma separated tag names.
    pub tags: String,
    pub description: String,
    pub payload: Bytes,
}

/// Something that went wrong after the upload itself had been committed.
#[derive(Debug, Clone, PartialEq, Eq, Display, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[display("tags {} were not attached: {reason}", tags.join(", "))]
    TagAssociation { tags: Vec<String>, reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub file_id: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub version: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// A version selector resolved against the metadata store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolved {
    pub version: u32,
    /// Blob key holding the version's bytes.
    pub path: String,
    pub content_type: String,
    pub size: u64,
    pub commit_message: String,
}

/// Stream of chunks of a downloaded file.
pub type DownloadStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

pub struct Download {
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub version: u32,
    pub stream: DownloadStream,
}

/// Descriptive view of a file at one of its versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileMetadata {
    pub file_id: String,
    pub owner: String,
    pub file_name: String,
    pub file_type: String,
    pub content_type: String,
    pub size: u64,
    /// The version described by `content_type` and `size`.
    pub version: u32,
    pub current_version: u32,
    #[serde(with = "unix_seconds")]
    pub created_at: UtcDateTime,
    #[serde(with = "unix_seconds")]
    pub updated_at: UtcDateTime,
    pub description: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
}
impl FileMetadata {
    /// Metadata of the current version, without a commit message.
    pub(crate) fn current(file: File, tags: Vec<String>) -> Self {
        Self {
            version: file.current_version,
            current_version: file.current_version,
            file_id: file.file_id,
            owner: file.owner,
            file_name: file.file_name,
            file_type: file.file_type,
            content_type: file.content_type,
            size: file.size,
            created_at: file.created_at,
            updated_at: file.updated_at,
            description: file.description,
            tags,
            commit_message: None,
        }
    }

    pub(crate) fn at(file: File, resolved: Resolved, tags: Vec<String>) -> Self {
        Self {
            version: resolved.version,
            content_type: resolved.content_type,
            size: resolved.size,
            commit_message: Some(resolved.commit_message),
            ..Self::current(file, tags)
        }
    }
}

/// Filters, ordering and window of a listing, as submitted by a caller.
///
/// Out-of-range values are normalised rather than rejected.
#[derive(Debug, Clone, Default)]
pub struct ListRequest {
    pub owner: Option<String>,
    /// Substring of the file name.
    pub name: Option<String>,
    pub file_type: Option<String>,
    pub tag: Option<String>,
    pub created_from: Option<UtcDateTime>,
    pub created_to: Option<UtcDateTime>,
    pub updated_from: Option<UtcDateTime>,
    pub updated_to: Option<UtcDateTime>,
    /// `name`, `size`, `type` or `date`.
    pub sort: Option<String>,
    /// `asc` or `desc`.
    pub direction: Option<String>,
    /// 1-based.
    pub page: i64,
    pub page_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub items: Vec<FileMetadata>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RevertReceipt {
    pub file_id: String,
    pub new_version: u32,
    pub reverted_to: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub version: u32,
    pub size: u64,
    pub content_type: String,
    #[serde(with = "unix_seconds")]
    pub created_at: UtcDateTime,
    pub commit_message: String,
    pub current: bool,
}
impl VersionInfo {
    pub(crate) fn new(version: FileVersion, current_version: u32) -> Self {
        Self {
            current: version.version_number == current_version,
            version: version.version_number,
            size: version.size,
            content_type: version.content_type,
            created_at: version.created_at,
            commit_message: version.commit_message,
        }
    }
}

/// Line-level changes between two textual versions, compared as multisets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LineChanges {
    pub added: u64,
    pub removed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionDiff {
    pub from: u32,
    pub to: u32,
    pub same_content: bool,
    /// `to.size - from.size`.
    pub size_delta: i64,
    pub content_type_changed: bool,
    /// Only computed when both versions are textual.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines: Option<LineChanges>,
}

/// Descriptive changes to a file. `None` leaves a field untouched; `tags`,
/// when given, replaces every tag of the file.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub description: Option<String>,
    /// Comma separated tag names; empty clears all tags.
    pub tags: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchDeletion {
    pub deleted: Vec<String>,
    /// Ids that were unknown or already deleted.
    pub missing: Vec<String>,
}
