use crate::error::{ErrorKind, Result};
use crate::models::{BatchDeletion, FileMetadata, MetadataUpdate};
use crate::{Vault, parse_tags};
use cairn_metadata::FileDetails;
use time::UtcDateTime;
use tracing::{info, instrument};

impl Vault {
    /// Move a file to the trash. Its blobs and versions are kept.
    #[instrument("deleting file", skip(self))]
    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let ids = [file_id.to_string()];
        let trashed = self.bounded(self.metadata.trash(&ids, UtcDateTime::now()), || ErrorKind::MetadataWrite).await?;
        if trashed.is_empty() {
            exn::bail!(ErrorKind::NotFound(format!("file {file_id}")));
        }
        info!(file_id = %file_id, "file trashed");
        Ok(())
    }

    /// Trash several files at once, all or nothing. Unknown or already
    /// trashed ids are reported back rather than failing the batch.
    #[instrument("deleting files", skip_all, fields(count = file_ids.len()))]
    pub async fn batch_delete(&self, file_ids: &[String]) -> Result<BatchDeletion> {
        let mut unique: Vec<String> = Vec::with_capacity(file_ids.len());
        for id in file_ids.iter().map(|id| id.trim()).filter(|id| !id.is_empty()) {
            if !unique.iter().any(|seen| seen == id) {
                unique.push(id.to_string());
            }
        }
        if unique.is_empty() {
            exn::bail!(ErrorKind::validation("no file ids given"));
        }
        let deleted =
            self.bounded(self.metadata.trash(&unique, UtcDateTime::now()), || ErrorKind::MetadataWrite).await?;
        let missing = unique.into_iter().filter(|id| !deleted.contains(id)).collect();
        info!(deleted = deleted.len(), "files trashed");
        Ok(BatchDeletion { deleted, missing })
    }

    /// Change descriptive fields and, optionally, replace every tag of a
    /// file. Content and versions are left alone.
    #[instrument("updating file metadata", skip(self, update))]
    pub async fn update_metadata(&self, file_id: &str, update: MetadataUpdate) -> Result<FileMetadata> {
        if update.file_name.is_none()
            && update.file_type.is_none()
            && update.description.is_none()
            && update.tags.is_none()
        {
            exn::bail!(ErrorKind::validation("nothing to update"));
        }
        let file_name = update.file_name.map(|name| name.trim().to_string());
        if file_name.as_deref().is_some_and(str::is_empty) {
            exn::bail!(ErrorKind::validation("file name is empty"));
        }
        let details = FileDetails {
            file_name,
            file_type: update.file_type.map(|t| t.trim().to_string()),
            description: update.description,
        };

        let tags = update.tags.as_deref().map(parse_tags);

        // One unit of work; touches `updated_at` even when only the tags change.
        let updated = self
            .bounded(self.metadata.update_details(file_id, &details, tags.as_deref(), UtcDateTime::now()), || {
                ErrorKind::MetadataWrite
            })
            .await?;
        if !updated {
            exn::bail!(ErrorKind::NotFound(format!("file {file_id}")));
        }
        self.metadata(file_id, None).await
    }
}
