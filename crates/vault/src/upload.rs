use crate::error::{ErrorKind, Result};
use crate::models::{UploadReceipt, UploadRequest, Warning};
use crate::saga::Saga;
use crate::{Vault, parse_tags};
use cairn_metadata::error::ErrorKind as MetadataErrorKind;
use cairn_metadata::{File, FileStatus, FileVersion};
use exn::ResultExt;
use futures::FutureExt;
use std::ops::Deref;
use std::path::Path;
use time::UtcDateTime;
use tracing::{info, instrument, warn};

const INITIAL_COMMIT_MESSAGE: &str = "Initial upload";

/// Owners become the first segment of a blob key, so they must be exactly
/// one harmless path segment.
fn validate_owner(owner: &str) -> Result<()> {
    let unsafe_char = |c: char| c == '/' || c == '\\' || c.is_control();
    if owner.is_empty() || owner == "." || owner == ".." || owner.contains(unsafe_char) {
        exn::bail!(ErrorKind::validation(format!("owner {owner:?} is not a valid path segment")));
    }
    Ok(())
}

fn file_type(file_name: &str, declared: Option<&str>) -> String {
    match declared.map(str::trim).filter(|t| !t.is_empty()) {
        Some(declared) => declared.to_string(),
        None => Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default(),
    }
}

impl Vault {
    /// Store a new file and register it as version 1.
    ///
    /// The blob is written before the metadata. If the metadata can't be
    /// committed, the blob is removed again, unless a concurrent upload of
    /// the same content committed first and now points at it.
    ///
    /// # Errors
    /// - [`Validation`](ErrorKind::Validation) before any I/O.
    /// - [`DuplicateContent`](ErrorKind::DuplicateContent) if the bytes are
    ///   already stored, including as a trashed file.
    /// - [`StorageWrite`](ErrorKind::StorageWrite) or
    ///   [`MetadataWrite`](ErrorKind::MetadataWrite) if a store fails.
    ///
    /// A failure to attach tags is reported as a [`Warning`] on the receipt.
    #[instrument("uploading file", skip_all, fields(owner = %request.owner, file_name = %request.file_name))]
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt> {
        validate_owner(&request.owner)?;
        let file_name = request.file_name.trim();
        if file_name.is_empty() {
            exn::bail!(ErrorKind::validation("file name is empty"));
        }
        if request.payload.is_empty() {
            exn::bail!(ErrorKind::validation("payload is empty"));
        }
        let size = request.payload.len() as u64;
        if size > self.settings.max_upload_size {
            exn::bail!(ErrorKind::validation(format!(
                "payload of {size} bytes exceeds the limit of {} bytes",
                self.settings.max_upload_size
            )));
        }

        let now = UtcDateTime::now();
        let address = cairn_address::address(&request.payload);
        let file_id = address.file_id;
        let path = cairn_address::storage_path(&request.owner, now, &file_id);
        let content_type = cairn_address::classify(&request.payload, file_name, request.content_type.as_deref());

        self.ensure_unique(&file_id, &path).await?;

        let file = File {
            file_id: file_id.clone(),
            owner: request.owner.clone(),
            file_name: file_name.to_string(),
            file_type: file_type(file_name, request.file_type.as_deref()),
            content_type: content_type.clone(),
            size,
            path: path.clone(),
            created_at: now,
            updated_at: now,
            current_version: 1,
            description: request.description.clone(),
            status: FileStatus::Active,
            trashed_at: None,
        };
        let version = FileVersion::new(&file_id, 1, size, &path, &content_type, now, INITIAL_COMMIT_MESSAGE);

        let mut saga = Saga::new("upload");
        saga.run_compensable(
            "put blob",
            self.bounded(
                self.blobs.write(Path::new(&path), request.payload.clone(), Some(&content_type)),
                || ErrorKind::StorageWrite,
            ),
            |_| self.remove_orphan(&file_id, &path).boxed(),
        )
        .await?;
        saga.run("register file", async {
            match self.within(self.metadata.create_file(&file, &version)).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) if matches!(e.deref(), MetadataErrorKind::Duplicate(_)) => {
                    Err(e).or_raise(|| ErrorKind::DuplicateContent(file_id.clone()))
                },
                Ok(Err(e)) => Err(e).or_raise(|| ErrorKind::MetadataWrite),
                Err(elapsed) => Err(elapsed).or_raise(|| ErrorKind::MetadataWrite),
            }
        })
        .await?;
        saga.commit();

        let tags = parse_tags(&request.tags);
        let mut warnings = Vec::new();
        if !tags.is_empty()
            && let Err(e) = self.bounded(self.metadata.attach_tags(&file_id, &tags), || ErrorKind::MetadataWrite).await
        {
            warn!(file_id = %file_id, ?tags, error = ?e, "file stored, but its tags were not");
            warnings.push(Warning::TagAssociation { tags, reason: e.to_string() });
        }

        info!(file_id = %file_id, size, content_type = %content_type, "file uploaded");
        Ok(UploadReceipt {
            file_id,
            file_name: file.file_name,
            content_type,
            size,
            version: 1,
            warnings,
        })
    }

    /// Reject content that is already known, to the metadata store or to
    /// the blob store.
    async fn ensure_unique(&self, file_id: &str, path: &str) -> Result<()> {
        let existing = self.bounded(self.metadata.file_record(file_id), || ErrorKind::MetadataRead).await?;
        if existing.is_some() {
            exn::bail!(ErrorKind::DuplicateContent(file_id.to_string()));
        }
        match self.within(self.blobs.stat(Path::new(path))).await {
            Ok(Ok(_)) => {
                // Left behind by an upload that failed halfway; never overwrite it.
                warn!(file_id = %file_id, path = %path, "blob exists without metadata");
                exn::bail!(ErrorKind::DuplicateContent(file_id.to_string()));
            },
            Ok(Err(e)) if e.is_not_found() => Ok(()),
            Ok(Err(e)) => Err(e).or_raise(|| ErrorKind::StorageRead),
            Err(elapsed) => Err(elapsed).or_raise(|| ErrorKind::StorageRead),
        }
    }

    /// Undo a blob write whose metadata never got committed.
    async fn remove_orphan(&self, file_id: &str, path: &str) -> Result<()> {
        // A concurrent upload of the same bytes may have committed a row
        // that now owns this very blob.
        match self.detached(self.metadata.file_record(file_id), || ErrorKind::MetadataRead).await {
            Ok(Some(winner)) if winner.path == path => {
                info!(file_id = %file_id, path = %path, "blob kept, it belongs to a concurrent upload");
                return Ok(());
            },
            Ok(_) => (),
            Err(e) => warn!(file_id = %file_id, error = ?e, "could not check for a concurrent upload"),
        }
        self.detached(self.blobs.delete(Path::new(path)), || ErrorKind::StorageWrite).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fault, harness, harness_with, request};
    use bytes::Bytes;
    use cairn_metadata::{FileQuery, MetadataStore};
    use cairn_storage::StorageBackend;
    use cairn_storage::backend::{MockBackend, MockOperation};
    use rstest::rstest;
    use std::time::Duration;

    const HELLO_ID: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    async fn file_count(repo: &cairn_metadata::Repository) -> u64 {
        repo.list_files(&FileQuery { limit: 100, ..FileQuery::default() }).await.unwrap().total
    }

    #[rstest]
    #[case("alice", true)]
    #[case("user-42@example.com", true)]
    #[case("", false)]
    #[case(".", false)]
    #[case("..", false)]
    #[case("a/b", false)]
    #[case("a\\b", false)]
    #[case("a\0b", false)]
    fn test_validate_owner(#[case] owner: &str, #[case] valid: bool) {
        assert_eq!(validate_owner(owner).is_ok(), valid);
    }

    #[rstest]
    #[case("notes.md", None, "md")]
    #[case("Photo.JPG", None, "jpg")]
    #[case("archive.tar.gz", None, "gz")]
    #[case("Makefile", None, "")]
    #[case("notes.md", Some("  markdown "), "markdown")]
    #[case("notes.md", Some(" "), "md")]
    fn test_file_type(#[case] name: &str, #[case] declared: Option<&str>, #[case] expected: &str) {
        assert_eq!(file_type(name, declared), expected);
    }

    #[tokio::test]
    async fn test_upload_registers_version_one() {
        let h = harness(&[]).await;
        let receipt = h
            .vault
            .upload(UploadRequest {
                tags: "a, b".to_string(),
                description: "greeting".to_string(),
                ..request("notes.md", "hello")
            })
            .await
            .unwrap();
        assert_eq!(receipt.file_id, HELLO_ID);
        assert_eq!(receipt.version, 1);
        assert_eq!(receipt.size, 5);
        assert!(receipt.content_type.starts_with("text/"));
        assert!(receipt.warnings.is_empty());

        let file = h.repo.get_file(HELLO_ID).await.unwrap().unwrap();
        assert_eq!(file.file_type, "md");
        assert_eq!(file.description, "greeting");
        assert!(file.path.starts_with("alice/") && file.path.ends_with(HELLO_ID));
        assert!(h.mock.exists(Path::new(&file.path)).await.unwrap());

        let versions = h.repo.list_versions(HELLO_ID).await.unwrap();
        assert_eq!(versions.len(), 1);
        assert_eq!(versions[0].commit_message, "Initial upload");
        assert_eq!(h.repo.tags_for_file(HELLO_ID).await.unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn test_sniffed_type_beats_declared() {
        let h = harness(&[]).await;
        let receipt = h
            .vault
            .upload(UploadRequest {
                owner: "alice".to_string(),
                file_name: "image.txt".to_string(),
                content_type: Some("text/plain".to_string()),
                payload: Bytes::from_static(b"\x89PNG\r\n\x1a\n0000"),
                ..UploadRequest::default()
            })
            .await
            .unwrap();
        assert_eq!(receipt.content_type, "image/png");
    }

    #[rstest]
    #[case::bad_owner(UploadRequest { owner: "../root".to_string(), ..request("a.txt", "x") })]
    #[case::blank_name(request("  ", "x"))]
    #[case::empty_payload(request("a.txt", ""))]
    #[tokio::test]
    async fn test_invalid_requests_touch_nothing(#[case] invalid: UploadRequest) {
        let h = harness(&[("file_record", Fault::Fail)]).await;
        let err = h.vault.upload(invalid).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(_)));
        assert!(h.mock.is_empty().await);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected() {
        let h = harness(&[]).await;
        let vault = Vault::new(
            h.blobs.clone(),
            h.store.clone(),
            crate::Settings {
                max_upload_size: 4,
                ..crate::Settings::default()
            },
        );
        let err = vault.upload(request("notes.md", "hello")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(_)));
        // Exactly at the limit is fine.
        vault.upload(request("notes.md", "hell")).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_content_is_rejected() {
        let h = harness(&[]).await;
        h.vault.upload(request("notes.md", "hello")).await.unwrap();
        let err = h.vault.upload(request("copy.md", "hello")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DuplicateContent(id) if id == HELLO_ID));
        assert_eq!(file_count(&h.repo).await, 1);
        assert_eq!(h.mock.len().await, 1);
    }

    #[tokio::test]
    async fn test_trashed_content_is_still_a_duplicate() {
        let h = harness(&[]).await;
        h.vault.upload(request("notes.md", "hello")).await.unwrap();
        h.vault.delete(HELLO_ID).await.unwrap();
        let err = h.vault.upload(request("notes.md", "hello")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DuplicateContent(_)));
    }

    #[tokio::test]
    async fn test_orphaned_blob_is_a_duplicate() {
        let path = cairn_address::storage_path("alice", UtcDateTime::now(), HELLO_ID);
        let h = harness_with(MockBackend::with_blobs([(path.as_str(), b"hello")]), &[]).await;
        let err = h.vault.upload(request("notes.md", "hello")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DuplicateContent(_)));
        assert_eq!(file_count(&h.repo).await, 0);
    }

    #[tokio::test]
    async fn test_blob_write_failure() {
        let h = harness_with(MockBackend::default().with_failure(MockOperation::Write), &[]).await;
        let err = h.vault.upload(request("notes.md", "hello")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StorageWrite));
        assert_eq!(file_count(&h.repo).await, 0);
    }

    #[tokio::test]
    async fn test_metadata_failure_removes_blob() {
        let h = harness(&[("create_file", Fault::Fail)]).await;
        let err = h.vault.upload(request("notes.md", "hello")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MetadataWrite));
        assert!(h.mock.is_empty().await);
        assert_eq!(file_count(&h.repo).await, 0);
        assert!(h.repo.file_record(HELLO_ID).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_compensation_keeps_original_error() {
        let mock = MockBackend::default().with_failure(MockOperation::Delete);
        let h = harness_with(mock, &[("create_file", Fault::Fail)]).await;
        let err = h.vault.upload(request("notes.md", "hello")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MetadataWrite));
        // Orphaned, but a re-upload will now be reported as a duplicate.
        assert_eq!(h.mock.len().await, 1);
    }

    #[tokio::test]
    async fn test_metadata_timeout_removes_blob() {
        let h = harness(&[("create_file", Fault::Hang)]).await;
        let vault = Vault::new(
            h.blobs.clone(),
            h.store.clone(),
            crate::Settings {
                operation_timeout: Duration::from_millis(200),
                ..crate::Settings::default()
            },
        );
        let err = vault.upload(request("notes.md", "hello")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MetadataWrite));
        assert!(h.mock.is_empty().await);
    }

    #[tokio::test]
    async fn test_lost_race_keeps_winner_blob() {
        let h = harness(&[("create_file", Fault::LoseRace)]).await;
        let err = h.vault.upload(request("notes.md", "hello")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DuplicateContent(id) if id == HELLO_ID));
        let winner = h.repo.get_file(HELLO_ID).await.unwrap().unwrap();
        assert_eq!(winner.owner, "someone-else");
        assert!(h.mock.exists(Path::new(&winner.path)).await.unwrap());
    }

    #[tokio::test]
    async fn test_tag_failure_is_a_warning() {
        let h = harness(&[("attach_tags", Fault::Fail)]).await;
        let receipt = h
            .vault
            .upload(UploadRequest {
                tags: "a,b".to_string(),
                ..request("notes.md", "hello")
            })
            .await
            .unwrap();
        assert_eq!(receipt.version, 1);
        assert!(matches!(
            receipt.warnings.as_slice(),
            [Warning::TagAssociation { tags, .. }] if tags == &["a", "b"]
        ));
        assert!(h.repo.get_file(HELLO_ID).await.unwrap().is_some());
        assert!(h.repo.tags_for_file(HELLO_ID).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_tags_skips_tagging() {
        let h = harness(&[("attach_tags", Fault::Fail)]).await;
        let receipt = h
            .vault
            .upload(UploadRequest {
                tags: " , ".to_string(),
                ..request("notes.md", "hello")
            })
            .await
            .unwrap();
        assert!(receipt.warnings.is_empty());
    }
}
