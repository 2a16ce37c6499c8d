use crate::Vault;
use crate::error::{ErrorKind, Result};
use crate::models::{Download, FileMetadata, Resolved};
use cairn_metadata::File;
use exn::{OptionExt, ResultExt};
use futures::StreamExt;
use std::path::Path;
use tracing::{error, instrument};

impl Vault {
    /// A live file, or [`NotFound`](ErrorKind::NotFound).
    pub(crate) async fn live_file(&self, file_id: &str) -> Result<File> {
        self.bounded(self.metadata.get_file(file_id), || ErrorKind::MetadataRead)
            .await?
            .ok_or_raise(|| ErrorKind::NotFound(format!("file {file_id}")))
    }

    /// Resolve `selector` against a file. Absent or non-positive selectors
    /// mean the current version.
    pub async fn resolve(&self, file_id: &str, selector: Option<i64>) -> Result<Resolved> {
        let file = self.live_file(file_id).await?;
        self.resolve_in(&file, selector).await
    }

    async fn resolve_in(&self, file: &File, selector: Option<i64>) -> Result<Resolved> {
        let (number, current) = match selector.filter(|&s| s > 0) {
            None => (file.current_version, true),
            Some(s) => {
                let number = u32::try_from(s)
                    .or_raise(|| ErrorKind::NotFound(format!("version {s} of file {}", file.file_id)))?;
                (number, false)
            },
        };
        let version = self
            .bounded(self.metadata.get_version(&file.file_id, number), || ErrorKind::MetadataRead)
            .await?;
        match (version, current) {
            // The file row is authoritative for the current version.
            (version, true) => Ok(Resolved {
                version: file.current_version,
                path: file.path.clone(),
                content_type: file.content_type.clone(),
                size: file.size,
                commit_message: version.map(|v| v.commit_message).unwrap_or_default(),
            }),
            (Some(version), false) => Ok(Resolved {
                version: version.version_number,
                path: version.path,
                content_type: version.content_type,
                size: version.size,
                commit_message: version.commit_message,
            }),
            (None, false) => exn::bail!(ErrorKind::NotFound(format!("version {number} of file {}", file.file_id))),
        }
    }

    /// Open a version of a file for streaming.
    ///
    /// Only opening the blob is subject to the vault's deadline; reading the
    /// stream is paced by the consumer. A failure halfway through is logged
    /// and ends the stream with a single error item.
    #[instrument("downloading file", skip(self))]
    pub async fn download(&self, file_id: &str, selector: Option<i64>) -> Result<Download> {
        let file = self.live_file(file_id).await?;
        let resolved = self.resolve_in(&file, selector).await?;
        let mut chunks =
            self.bounded(self.blobs.reader(Path::new(&resolved.path)), || ErrorKind::StorageRead).await?;

        let file_id = file.file_id.clone();
        let version = resolved.version;
        let stream = async_stream::stream! {
            while let Some(chunk) = chunks.next().await {
                match chunk {
                    Ok(bytes) => yield Ok(bytes),
                    Err(e) => {
                        error!(file_id = %file_id, version, error = ?e, "download interrupted");
                        let failed: Result<_> = Err(e).or_raise(|| ErrorKind::StorageRead);
                        yield failed;
                        break;
                    },
                }
            }
        };
        Ok(Download {
            file_name: file.file_name,
            content_type: resolved.content_type,
            size: resolved.size,
            version: resolved.version,
            stream: Box::pin(stream),
        })
    }

    /// Describe a version of a file, with its tags and commit message.
    pub async fn metadata(&self, file_id: &str, selector: Option<i64>) -> Result<FileMetadata> {
        let file = self.live_file(file_id).await?;
        let resolved = self.resolve_in(&file, selector).await?;
        let tags = self.bounded(self.metadata.tags_for_file(file_id), || ErrorKind::MetadataRead).await?;
        Ok(FileMetadata::at(file, resolved, tags))
    }
}
