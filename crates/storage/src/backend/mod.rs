//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, a unified put/get/stat/remove
//! interface over blob stores (local filesystem, S3-compatible services, and an
//! in-memory mock for tests).

mod local;
#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "s3")]
mod s3;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::{MockBackend, MockOperation};
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::{Error, Result};
use crate::models::BlobInfo;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

/// Stream of blob chunks returned by [`StorageBackend::reader`].
///
/// The stream is `'static`: the backend does all of its borrowing while
/// opening the blob, so the stream can be handed to whoever ends up
/// consuming the bytes.
pub type BlobStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// Unified interface for blob storage backends.
///
/// Every operation is a (potentially) remote call that may fail or stall;
/// none of them are transactional with anything else. Callers that need
/// consistency with another store have to build it themselves.
///
/// # Path Handling
/// All paths are relative to the storage root and are validated using
/// [`validate_path`](crate::validate_path) by every implementation.
///
/// # Not Found
/// Absence is reported as [`ErrorKind::NotFound`](crate::error::ErrorKind::NotFound), distinct from every
/// other failure, so that callers can tell "absent" from "unreachable".
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use cairn_storage::{backend::StorageBackend, error::Result};
///
/// async fn copy_blob(backend: &dyn StorageBackend, from: &Path, to: &Path) -> Result<u64> {
///     let info = backend.stat(from).await?;
///     let data = backend.read(from).await?;
///     backend.write(to, data, info.content_type.as_deref()).await?;
///     Ok(info.size)
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Check whether a blob exists.
    ///
    /// Default implementation calls [`stat()`](Self::stat) and maps
    /// [`NotFound`](crate::error::ErrorKind::NotFound) to `false`; any other error is
    /// propagated, never guessed at.
    async fn exists(&self, path: &Path) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Get blob metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob does not exist.
    async fn stat(&self, path: &Path) -> Result<BlobInfo>;

    /// Open a blob for streaming reads.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob does not exist.
    /// Errors that happen after the stream has been handed out are yielded
    /// as stream items.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use futures::TryStreamExt;
    /// use std::path::Path;
    /// # use cairn_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.reader(Path::new("alice/202405/abc")).await?;
    /// while let Some(chunk) = stream.try_next().await? {
    ///     println!("{} bytes", chunk.len());
    /// }
    /// # Ok(())
    /// # }
    /// ```
    async fn reader(&self, path: &Path) -> Result<BlobStream>;

    /// Read a whole blob into memory.
    ///
    /// Default implementation collects [`reader()`](Self::reader).
    async fn read(&self, path: &Path) -> Result<Bytes> {
        let chunks = self.reader(path).await?;
        let buffer = chunks
            .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
                buffer.extend_from_slice(&chunk);
                Ok::<_, Error>(buffer)
            })
            .await?;
        Ok(buffer.freeze())
    }

    /// Write a blob, replacing any existing blob at the same path.
    ///
    /// # Notes
    /// - Implementations create intermediate "directories" as needed.
    /// - `content_type` is stored where the backend supports it (object
    ///   metadata on S3) and ignored otherwise.
    async fn write(&self, path: &Path, data: Bytes, content_type: Option<&str>) -> Result<()>;

    /// Delete a blob.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the blob does not exist
    /// and the backend is able to tell (S3 is not).
    async fn delete(&self, path: &Path) -> Result<()>;
}
