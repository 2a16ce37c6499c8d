//! Upload and version coordination for the cairn vault.
//!
//! A [`Vault`] ties a blob store ([`BackendHandle`]) to a metadata store
//! ([`MetadataHandle`]). The two never share a transaction: writes go to the
//! blob store first, and any metadata failure afterwards is undone by the
//! compensations of a [`saga`]. Blobs are immutable and content addressed,
//! so reverting a file only ever adds a version pointing at an existing blob.
//!
//! ```text
//! upload ──► validate ──► address ──► dedup ──► put blob ──► file + v1 ──► tags
//!                                                  ▲              │
//!                                                  └── delete ◄───┘ (on failure)
//! ```

pub mod error;
mod history;
mod list;
mod manage;
mod models;
mod resolve;
mod revert;
mod saga;
#[cfg(test)]
mod testing;
mod upload;

pub use crate::models::{
    BatchDeletion, Download, DownloadStream, FileMetadata, LineChanges, ListRequest, Listing, MetadataUpdate,
    Resolved, RevertReceipt, UploadReceipt, UploadRequest, VersionDiff, VersionInfo, Warning,
};
use crate::error::{ErrorKind, Result};
use cairn_metadata::MetadataHandle;
use cairn_storage::BackendHandle;
use exn::ResultExt;
use std::error::Error as StdError;
use std::time::Duration;
use tokio::time::{Instant, error::Elapsed, timeout_at};

/// Default budget for a single store call.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Limits applied by every [`Vault`] operation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Largest payload accepted by [`Vault::upload`], in bytes.
    pub max_upload_size: u64,
    /// Budget for each individual store call.
    pub operation_timeout: Duration,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            max_upload_size: cairn_address::MAX_UPLOAD_SIZE,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

/// Entry point for every file operation.
///
/// Cheap to clone; holds no mutable state of its own.
#[derive(Clone)]
pub struct Vault {
    blobs: BackendHandle,
    metadata: MetadataHandle,
    settings: Settings,
    deadline: Option<Instant>,
}

impl Vault {
    pub fn new(blobs: BackendHandle, metadata: MetadataHandle, settings: Settings) -> Self {
        Self { blobs, metadata, settings, deadline: None }
    }

    /// A copy of this vault whose store calls all give up at `deadline`, or
    /// after the per-call timeout, whichever comes first.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self { deadline: Some(deadline), ..self.clone() }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn call_deadline(&self) -> Instant {
        let per_call = Instant::now() + self.settings.operation_timeout;
        self.deadline.map_or(per_call, |deadline| deadline.min(per_call))
    }

    /// Run a store call under the vault's deadline, leaving its error as is.
    ///
    /// For callers that need to tell one store error from another.
    async fn within<F: Future>(&self, call: F) -> std::result::Result<F::Output, Elapsed> {
        timeout_at(self.call_deadline(), call).await
    }

    /// Run a store call under the vault's deadline and raise any failure,
    /// timeouts included, into `kind`.
    async fn bounded<T, E>(
        &self,
        call: impl Future<Output = std::result::Result<T, exn::Exn<E>>>,
        kind: impl FnOnce() -> ErrorKind,
    ) -> Result<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        match self.within(call).await {
            Ok(result) => result.or_raise(kind),
            Err(elapsed) => Err(elapsed).or_raise(kind),
        }
    }

    /// Like [`bounded`](Self::bounded), but ignores the caller's absolute
    /// deadline. Compensations must still get a chance to run after the
    /// step they undo ran out of time.
    async fn detached<T, E>(
        &self,
        call: impl Future<Output = std::result::Result<T, exn::Exn<E>>>,
        kind: impl FnOnce() -> ErrorKind,
    ) -> Result<T>
    where
        E: StdError + Send + Sync + 'static,
    {
        match tokio::time::timeout(self.settings.operation_timeout, call).await {
            Ok(result) => result.or_raise(kind),
            Err(elapsed) => Err(elapsed).or_raise(kind),
        }
    }
}

/// Comma separated tag input: trimmed, empties dropped, first occurrence kept.
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for tag in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        if !tags.iter().any(|seen| seen == tag) {
            tags.push(tag.to_string());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fault, harness, request};
    use rstest::rstest;

    #[rstest]
    #[case("", &[])]
    #[case("a,b", &["a", "b"])]
    #[case(" a , ,b,a ", &["a", "b"])]
    #[case(",,,", &[])]
    #[case("rust lang, rust", &["rust lang", "rust"])]
    fn test_parse_tags(#[case] raw: &str, #[case] expected: &[&str]) {
        assert_eq!(parse_tags(raw), expected);
    }

    #[tokio::test]
    async fn test_deadline_wins_over_operation_timeout() {
        let h = harness(&[("get_file", Fault::Delay(Duration::from_secs(60)))]).await;
        let vault = h.vault.with_deadline(Instant::now() + Duration::from_millis(50));
        let started = Instant::now();
        let err = vault.metadata("abc", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MetadataRead));
        assert!(started.elapsed() < DEFAULT_OPERATION_TIMEOUT);
    }

    #[tokio::test]
    async fn test_hanging_store_times_out() {
        let h = harness(&[("get_file", Fault::Hang)]).await;
        let vault = Vault::new(
            h.blobs.clone(),
            h.store.clone(),
            Settings {
                operation_timeout: Duration::from_millis(50),
                ..Settings::default()
            },
        );
        let err = vault.metadata("abc", None).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MetadataRead));
        assert!(err.is_retryable());
    }
}
