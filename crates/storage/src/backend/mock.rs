//! In-memory storage backend for testing.

use crate::backend::BlobStream;
use crate::error::{ErrorKind, Result};
use crate::path::validate as validate_path;
use crate::{BlobInfo, StorageBackend};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::UtcDateTime;
use tokio::sync::RwLock;

/// Chunk size used when streaming blobs out of the mock.
const CHUNK_SIZE: usize = 4096;

struct Blob {
    inserted: UtcDateTime,
    content_type: Option<String>,
    data: Bytes,
}

/// Operations that can be told to fail via [`MockBackend::with_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Stat,
    Read,
    Write,
    Delete,
}

/// In-memory storage backend for testing.
///
/// Blobs are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// can operate on `&self` without external synchronisation. Individual
/// operations can be made to fail, or every operation delayed, to exercise
/// error and timeout handling in dependent crates.
///
/// # Examples
///
/// ```
/// use cairn_storage::backend::{MockBackend, MockOperation, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_blobs([("alice/202405/abc", b"hello")]);
/// assert!(backend.exists(Path::new("alice/202405/abc")).await?);
///
/// let broken = MockBackend::default().with_failure(MockOperation::Write);
/// assert!(broken.write(Path::new("x"), "data".into(), None).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    storage: RwLock<HashMap<PathBuf, Blob>>,
    failures: HashSet<MockOperation>,
    latency: Option<Duration>,
    interrupt_after: Option<usize>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with blobs.
    ///
    /// Panics if any path fails validation (e.g. path traversal). If test
    /// setup is wrong, then test should not pass.
    pub fn with_blobs(blobs: impl IntoIterator<Item = (impl Into<PathBuf>, impl AsRef<[u8]>)>) -> Self {
        let mut map = HashMap::new();
        let now = UtcDateTime::now();
        for (path, data) in blobs {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_blobs: invalid path {}", path.display());
            };
            let blob = Blob {
                inserted: now,
                content_type: None,
                data: Bytes::copy_from_slice(data.as_ref()),
            };
            map.insert(validated, blob);
        }
        Self {
            storage: RwLock::new(map),
            failures: HashSet::new(),
            latency: None,
            interrupt_after: None,
        }
    }

    /// Make every call of `operation` fail with a backend error.
    pub fn with_failure(mut self, operation: MockOperation) -> Self {
        self.failures.insert(operation);
        self
    }

    /// Delay every operation by `latency` before doing anything.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Let every read stream yield at most `chunks` chunks and then fail, as
    /// if the connection dropped halfway through.
    pub fn with_interrupted_reads(mut self, chunks: usize) -> Self {
        self.interrupt_after = Some(chunks);
        self
    }

    /// Number of blobs currently stored.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn enter(&self, operation: MockOperation) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failures.contains(&operation) {
            exn::bail!(ErrorKind::BackendError(format!("injected {operation:?} failure")));
        }
        Ok(())
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let blobs: [(&str, &[u8]); 0] = [];
        Self::with_blobs(blobs)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stat(&self, path: &Path) -> Result<BlobInfo> {
        self.enter(MockOperation::Stat).await?;
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let blob = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(BlobInfo::new(&path, blob.data.len() as u64, blob.inserted).with_content_type(blob.content_type.clone()))
    }

    async fn reader(&self, path: &Path) -> Result<BlobStream> {
        self.enter(MockOperation::Read).await?;
        let path = validate_path(path)?;
        let data = self
            .storage
            .read()
            .await
            .get(&path)
            .map(|blob| blob.data.clone())
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        let mut chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + CHUNK_SIZE).min(data.len()))))
            .collect();
        if let Some(after) = self.interrupt_after {
            chunks.truncate(after);
            chunks.push(Err(exn::Exn::from(ErrorKind::BackendError(format!(
                "injected interruption after {after} chunks"
            )))));
        }
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn write(&self, path: &Path, data: Bytes, content_type: Option<&str>) -> Result<()> {
        self.enter(MockOperation::Write).await?;
        let path = validate_path(path)?;
        let blob = Blob {
            inserted: UtcDateTime::now(),
            content_type: content_type.map(str::to_string),
            data,
        };
        self.storage.write().await.insert(path, blob);
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        self.enter(MockOperation::Delete).await?;
        let path = validate_path(path)?;
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MockBackend::default();
        backend.write(Path::new("a/b"), Bytes::from_static(b"hello"), Some("text/plain")).await.unwrap();
        assert_eq!(backend.read(Path::new("a/b")).await.unwrap(), Bytes::from_static(b"hello"));
        let info = backend.stat(Path::new("a/b")).await.unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn test_read_chunks_reassemble() {
        let data = vec![1u8; CHUNK_SIZE * 2 + 10];
        let backend = MockBackend::with_blobs([("big", data.clone())]);
        assert_eq!(backend.read(Path::new("big")).await.unwrap(), Bytes::from(data));
    }

    #[tokio::test]
    async fn test_empty_blob_reads_empty() {
        let backend = MockBackend::with_blobs([("empty", b"")]);
        assert!(backend.read(Path::new("empty")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found() {
        let backend = MockBackend::default();
        assert!(!backend.exists(Path::new("missing")).await.unwrap());
        assert!(backend.stat(Path::new("missing")).await.unwrap_err().is_not_found());
        assert!(backend.delete(Path::new("missing")).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure_is_not_not_found() {
        let backend = MockBackend::with_blobs([("a", b"1")]).with_failure(MockOperation::Stat);
        let err = backend.exists(Path::new("a")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::BackendError(_)));
        // Other operations are unaffected.
        backend.delete(Path::new("a")).await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_interrupted_reads() {
        let data = vec![7u8; CHUNK_SIZE * 3];
        let backend = MockBackend::with_blobs([("big", data)]).with_interrupted_reads(2);
        let items: Vec<Result<Bytes>> = backend.reader(Path::new("big")).await.unwrap().collect().await;
        assert_eq!(items.len(), 3);
        assert!(items[..2].iter().all(|chunk| chunk.as_ref().is_ok_and(|c| c.len() == CHUNK_SIZE)));
        assert!(matches!(items[2].as_ref().map_err(|e| &**e), Err(ErrorKind::BackendError(_))));
        // Opening still works, so stat and friends are unaffected.
        assert_eq!(backend.stat(Path::new("big")).await.unwrap().size, (CHUNK_SIZE * 3) as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency() {
        let backend = MockBackend::default().with_latency(Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        backend.write(Path::new("a"), Bytes::new(), None).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::default();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), Bytes::new(), None).await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_blobs_panics_on_bad_path() {
        MockBackend::with_blobs([("../escape", b"bad")]);
    }
}
