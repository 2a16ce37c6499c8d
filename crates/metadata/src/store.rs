//! The metadata store interface consumed by the vault.

use crate::error::Result;
use crate::models::{File, FileDetails, FileQuery, FileVersion, Page, Tag};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use time::UtcDateTime;

/// Shared handle to a metadata store.
pub type MetadataHandle = Arc<dyn MetadataStore>;

/// Relational persistence of files, versions and tags.
///
/// Methods documented as a *unit of work* either apply every write or none.
/// Every read excludes trashed files unless its documentation says otherwise.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up a file by id, **including** trashed files.
    ///
    /// Only meant for deduplication and upload compensation, where a trashed
    /// row still owns its id.
    async fn file_record(&self, file_id: &str) -> Result<Option<File>>;

    /// Look up a live file by id.
    async fn get_file(&self, file_id: &str) -> Result<Option<File>>;

    async fn get_version(&self, file_id: &str, version_number: u32) -> Result<Option<FileVersion>>;

    /// All versions of a file, oldest first.
    async fn list_versions(&self, file_id: &str) -> Result<Vec<FileVersion>>;

    /// Insert a new file together with its first version (unit of work).
    ///
    /// Returns [`Duplicate`](crate::error::ErrorKind::Duplicate) if the file id
    /// is already taken, whether by a live or a trashed file.
    async fn create_file(&self, file: &File, version: &FileVersion) -> Result<()>;

    /// Find or create each tag and link it to the file (unit of work).
    async fn attach_tags(&self, file_id: &str, names: &[String]) -> Result<Vec<Tag>>;

    async fn find_tag(&self, name: &str) -> Result<Option<Tag>>;

    /// Tag names of one file, sorted.
    async fn tags_for_file(&self, file_id: &str) -> Result<Vec<String>>;

    /// Tag names for several files at once, keyed by file id. Files without
    /// tags are absent from the map.
    async fn tags_for_files(&self, file_ids: &[String]) -> Result<HashMap<String, Vec<String>>>;

    async fn list_files(&self, query: &FileQuery) -> Result<Page<File>>;

    /// Append `version` and make it the file's current snapshot (unit of work).
    ///
    /// Only succeeds while the file's current version is still
    /// `expected_current`; otherwise returns
    /// [`Conflict`](crate::error::ErrorKind::Conflict) and writes nothing.
    async fn append_version(&self, version: &FileVersion, expected_current: u32) -> Result<()>;

    /// Update descriptive fields of a live file and, when `tags` is given,
    /// replace all of its tags with them (unit of work). An empty `tags`
    /// clears them. Returns `false` if there is no such file.
    async fn update_details(
        &self,
        file_id: &str,
        details: &FileDetails,
        tags: Option<&[String]>,
        at: UtcDateTime,
    ) -> Result<bool>;

    /// Soft-delete files (unit of work). Returns the ids that were live and
    /// are now trashed.
    async fn trash(&self, file_ids: &[String], at: UtcDateTime) -> Result<Vec<String>>;
}
