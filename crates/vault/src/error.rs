//! Vault Error Types
//!
//! Errors from the blob and metadata stores are raised into one of the
//! kinds below at the vault boundary, so the original failure stays
//! reachable as a child in the `exn` error tree.

use derive_more::{Display, Error};

/// A vault error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong, from the caller's point of view.
///
/// ### Request Errors
/// - [`ErrorKind::Validation`]
/// - [`ErrorKind::DuplicateContent`]
/// - [`ErrorKind::NotFound`]
///
/// ### Dependency Errors
/// Raised when a store call fails or runs out of time:
/// - [`ErrorKind::StorageWrite`]
/// - [`ErrorKind::StorageRead`]
/// - [`ErrorKind::MetadataWrite`]
/// - [`ErrorKind::MetadataRead`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The request was rejected before any I/O happened.
    #[display("invalid request: {_0}")]
    Validation(#[error(not(source))] String),
    /// The payload is already stored; carries the existing file id.
    #[display("content already stored as {_0}")]
    DuplicateContent(#[error(not(source))] String),
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("blob store write failed")]
    StorageWrite,
    #[display("blob store read failed")]
    StorageRead,
    #[display("metadata store write failed")]
    MetadataWrite,
    #[display("metadata store read failed")]
    MetadataRead,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageWrite | Self::StorageRead | Self::MetadataWrite | Self::MetadataRead)
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}
