//! Content addressing for the cairn vault.
//!
//! A file's identity is the SHA-256 digest of its bytes. The same digest
//! doubles as the deduplication key and as the last segment of the blob key
//! the bytes are stored under:
//!
//! ```text
//! {owner}/{YYYYMM}/{file_id}
//! ```
//!
//! Payloads are buffered in memory before hashing, which is why uploads are
//! capped at [`MAX_UPLOAD_SIZE`]. Hashing first means the blob key is known
//! before a single byte is written to the blob store.

mod mime;

pub use crate::mime::{OCTET_STREAM, classify, is_textual, sniff};
use sha2::{Digest, Sha256};
use time::UtcDateTime;

/// Largest payload accepted for a single upload (16 MiB).
pub const MAX_UPLOAD_SIZE: u64 = 16 * 1024 * 1024;

/// Content address of a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    /// Lowercase hex SHA-256 digest (64 characters).
    pub file_id: String,
    pub size: u64,
}

/// Compute the content address of a fully buffered payload.
///
/// # Examples
///
/// ```
/// let address = cairn_address::address(b"hello");
/// assert_eq!(address.size, 5);
/// assert_eq!(address.file_id, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
/// ```
#[must_use]
pub fn address(bytes: &[u8]) -> Address {
    Address {
        file_id: format!("{:x}", Sha256::digest(bytes)),
        size: bytes.len() as u64,
    }
}

/// Six-digit `YYYYMM` bucket for a timestamp.
#[must_use]
pub fn year_month(at: UtcDateTime) -> String {
    format!("{:04}{:02}", at.year(), u8::from(at.month()))
}

/// Blob key for a file owned by `owner`, first stored at `at`.
///
/// Collision free by construction: `file_id` already disambiguates content,
/// and the owner segment keeps tenants apart.
#[must_use]
pub fn storage_path(owner: &str, at: UtcDateTime, file_id: &str) -> String {
    format!("{owner}/{}/{file_id}", year_month(at))
}
