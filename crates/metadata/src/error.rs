//! Metadata Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A metadata error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for metadata operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    #[display("unsupported database driver: {_0}")]
    UnsupportedDriver(#[error(not(source))] String),
    #[display("invalid database connection string for {_0}")]
    InvalidDsn(#[error(not(source))] &'static str),
    /// A row with the same primary key already exists.
    #[display("duplicate file: {_0}")]
    Duplicate(#[error(not(source))] String),
    /// Optimistic concurrency check failed; re-read and try again.
    #[display("concurrent modification of file: {_0}")]
    Conflict(#[error(not(source))] String),
    /// Serialization/deserialization error.
    #[display("invalid metadata: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database | Self::Conflict(_))
    }
}
