//! Shared fixtures for the vault's unit tests.

use crate::{Settings, UploadRequest, Vault};
use async_trait::async_trait;
use bytes::Bytes;
use cairn_metadata::error::{ErrorKind as MetadataErrorKind, Result as MetadataResult};
use cairn_metadata::{
    Database, File, FileDetails, FileQuery, FileVersion, MetadataHandle, MetadataStore, Page, Repository, Tag,
};
use cairn_storage::BackendHandle;
use cairn_storage::backend::MockBackend;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use time::UtcDateTime;

/// How a wrapped [`MetadataStore`] call misbehaves.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Fail with a database error without touching the store.
    Fail,
    /// Never complete.
    Hang,
    /// Wait before delegating.
    Delay(Duration),
    /// `create_file` only: let a concurrent upload of the same file win the
    /// race right before this one commits.
    LoseRace,
    /// Report an optimistic concurrency conflict on the first `n` calls, then
    /// delegate.
    Conflict(u32),
}

/// A [`Repository`] wrapper that injects faults into named calls.
pub struct FaultyStore {
    inner: Repository,
    faults: HashMap<&'static str, Fault>,
    conflicts: AtomicU32,
}

impl FaultyStore {
    async fn enter(&self, call: &'static str) -> MetadataResult<()> {
        match self.faults.get(call) {
            Some(Fault::Fail) => exn::bail!(MetadataErrorKind::Database),
            Some(Fault::Hang) => std::future::pending().await,
            Some(Fault::Delay(delay)) => tokio::time::sleep(*delay).await,
            Some(Fault::Conflict(times)) => {
                if self.conflicts.fetch_add(1, Ordering::SeqCst) < *times {
                    exn::bail!(MetadataErrorKind::Conflict(call.to_string()));
                }
            },
            Some(Fault::LoseRace) | None => (),
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataStore for FaultyStore {
    async fn file_record(&self, file_id: &str) -> MetadataResult<Option<File>> {
        self.enter("file_record").await?;
        self.inner.file_record(file_id).await
    }

    async fn get_file(&self, file_id: &str) -> MetadataResult<Option<File>> {
        self.enter("get_file").await?;
        self.inner.get_file(file_id).await
    }

    async fn get_version(&self, file_id: &str, version_number: u32) -> MetadataResult<Option<FileVersion>> {
        self.enter("get_version").await?;
        self.inner.get_version(file_id, version_number).await
    }

    async fn list_versions(&self, file_id: &str) -> MetadataResult<Vec<FileVersion>> {
        self.enter("list_versions").await?;
        self.inner.list_versions(file_id).await
    }

    async fn create_file(&self, file: &File, version: &FileVersion) -> MetadataResult<()> {
        self.enter("create_file").await?;
        if let Some(Fault::LoseRace) = self.faults.get("create_file") {
            let winner = File {
                owner: "someone-else".to_string(),
                ..file.clone()
            };
            self.inner.create_file(&winner, version).await?;
        }
        self.inner.create_file(file, version).await
    }

    async fn attach_tags(&self, file_id: &str, names: &[String]) -> MetadataResult<Vec<Tag>> {
        self.enter("attach_tags").await?;
        self.inner.attach_tags(file_id, names).await
    }

    async fn find_tag(&self, name: &str) -> MetadataResult<Option<Tag>> {
        self.enter("find_tag").await?;
        self.inner.find_tag(name).await
    }

    async fn tags_for_file(&self, file_id: &str) -> MetadataResult<Vec<String>> {
        self.enter("tags_for_file").await?;
        self.inner.tags_for_file(file_id).await
    }

    async fn tags_for_files(&self, file_ids: &[String]) -> MetadataResult<HashMap<String, Vec<String>>> {
        self.enter("tags_for_files").await?;
        self.inner.tags_for_files(file_ids).await
    }

    async fn list_files(&self, query: &FileQuery) -> MetadataResult<Page<File>> {
        self.enter("list_files").await?;
        self.inner.list_files(query).await
    }

    async fn append_version(&self, version: &FileVersion, expected_current: u32) -> MetadataResult<()> {
        self.enter("append_version").await?;
        self.inner.append_version(version, expected_current).await
    }

    async fn update_details(
        &self,
        file_id: &str,
        details: &FileDetails,
        tags: Option<&[String]>,
        at: UtcDateTime,
    ) -> MetadataResult<bool> {
        self.enter("update_details").await?;
        self.inner.update_details(file_id, details, tags, at).await
    }

    async fn trash(&self, file_ids: &[String], at: UtcDateTime) -> MetadataResult<Vec<String>> {
        self.enter("trash").await?;
        self.inner.trash(file_ids, at).await
    }
}

pub struct Harness {
    pub vault: Vault,
    pub mock: Arc<MockBackend>,
    pub blobs: BackendHandle,
    pub store: MetadataHandle,
    /// The store without any faults, for assertions.
    pub repo: Repository,
}

/// A vault over an in-memory blob store and an in-memory SQLite database,
/// with `faults` injected into the metadata store.
pub async fn harness(faults: &[(&'static str, Fault)]) -> Harness {
    harness_with(MockBackend::default(), faults).await
}

pub async fn harness_with(mock: MockBackend, faults: &[(&'static str, Fault)]) -> Harness {
    let db = Database::connect_in_memory().await.unwrap();
    let repo = Repository::from(&db);
    let mock = Arc::new(mock);
    let blobs: BackendHandle = mock.clone();
    let store: MetadataHandle = Arc::new(FaultyStore {
        inner: repo.clone(),
        faults: faults.iter().copied().collect(),
        conflicts: AtomicU32::new(0),
    });
    let vault = Vault::new(blobs.clone(), store.clone(), Settings::default());
    Harness { vault, mock, blobs, store, repo }
}

pub fn request(file_name: &str, payload: &'static str) -> UploadRequest {
    UploadRequest {
        owner: "alice".to_string(),
        file_name: file_name.to_string(),
        payload: Bytes::from_static(payload.as_bytes()),
        ..UploadRequest::default()
    }
}
