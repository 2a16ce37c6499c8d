//! Local filesystem storage backend.
//!
//! Blobs are regular files below a configured root directory, accessed via
//! `tokio::fs`. Content types are not persisted.
//!
//! Writes go to a hidden sibling first and are renamed into place, so a blob
//! key never points at a partially written file.

use crate::backend::BlobStream;
use crate::error::{ErrorKind, Result};
use crate::{BlobInfo, StorageBackend, path::validate as validate_path};
use async_trait::async_trait;
use bytes::Bytes;
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use std::fs::{Metadata, create_dir_all as sync_create_dir};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;
use time::UtcDateTime;
use tokio::fs;
use tokio_util::io::ReaderStream;

static STAGED_WRITES: AtomicU64 = AtomicU64::new(0);

/// Where a write to `target` is staged before being renamed into place: the
/// same directory, hidden, and unique per process and call.
fn staging_path(target: &Path) -> PathBuf {
    let name = target.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    let n = STAGED_WRITES.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(".{name}.{}.{n}.part", std::process::id()))
}

/// Local filesystem storage backend.
///
/// # Examples
///
/// ```no_run
/// use cairn_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("local", "/var/lib/cairn/blobs")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory for all blobs
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPath`](ErrorKind::InvalidPath) if `root` is relative
    /// or exists but isn't a directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Constructor runs once at startup; not worth making it async.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Validate a relative blob key and join it onto the root.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }

    fn info(path: &Path, metadata: Metadata) -> Result<BlobInfo> {
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        let seconds = modified
            .duration_since(UNIX_EPOCH)
            .or_raise(|| ErrorKind::BackendError("modification time before epoch".to_string()))?
            .as_secs();
        let modified = i64::try_from(seconds)
            .ok()
            .and_then(|s| UtcDateTime::from_unix_timestamp(s).ok())
            .ok_or_raise(|| ErrorKind::BackendError("modification time out of range".to_string()))?;
        Ok(BlobInfo::new(path, metadata.len(), modified))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(e),
        }
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stat(&self, path: &Path) -> Result<BlobInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        Self::info(path, metadata)
    }

    async fn reader(&self, path: &Path) -> Result<BlobStream> {
        let abs_path = self.absolute_path(path)?;
        let file = fs::File::open(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?;
        let owned = path.to_path_buf();
        Ok(Box::pin(ReaderStream::new(file).map_err(move |e| exn::Exn::from(Self::map_io_error(e, &owned)))))
    }

    async fn write(&self, path: &Path, data: Bytes, _content_type: Option<&str>) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        // Create parent directories, to keep behaviour consistent with S3.
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| Self::map_io_error(e, path))?;
        }
        let staged = staging_path(&abs_path);
        let written = match fs::write(&staged, &data).await {
            Ok(()) => fs::rename(&staged, &abs_path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&staged).await
                && cleanup.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(path = %staged.display(), error = %cleanup, "could not remove staged write");
            }
            exn::bail!(Self::map_io_error(e, path));
        }
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| Self::map_io_error(e, path))?)
    }
}
