use crate::Vault;
use crate::error::{ErrorKind, Result};
use crate::models::RevertReceipt;
use cairn_metadata::FileVersion;
use cairn_metadata::error::ErrorKind as MetadataErrorKind;
use exn::{OptionExt, ResultExt};
use std::ops::Deref;
use time::UtcDateTime;
use tracing::{debug, info, instrument};

/// How often a revert re-reads the file after losing a race for the next
/// version number.
const REVERT_ATTEMPTS: usize = 3;

impl Vault {
    /// Make an older version current again by appending a new version that
    /// points at the same blob.
    ///
    /// # Errors
    /// - [`Validation`](ErrorKind::Validation) if `target` is not positive.
    /// - [`NotFound`](ErrorKind::NotFound) if the file or version is unknown.
    /// - [`MetadataWrite`](ErrorKind::MetadataWrite) if the new version could
    ///   not be committed, including after every attempt lost a race.
    #[instrument("reverting file", skip(self))]
    pub async fn revert(&self, file_id: &str, target: i64) -> Result<RevertReceipt> {
        if target <= 0 {
            exn::bail!(ErrorKind::validation(format!("version {target} is not a positive number")));
        }
        let target =
            u32::try_from(target).or_raise(|| ErrorKind::NotFound(format!("version {target} of file {file_id}")))?;

        let mut attempt = 1;
        loop {
            let file = self.live_file(file_id).await?;
            let source = self
                .bounded(self.metadata.get_version(file_id, target), || ErrorKind::MetadataRead)
                .await?
                .ok_or_raise(|| ErrorKind::NotFound(format!("version {target} of file {file_id}")))?;

            let new_version = file.current_version + 1;
            let version = FileVersion::new(
                file_id,
                new_version,
                source.size,
                source.path,
                source.content_type,
                UtcDateTime::now(),
                format!("Revert to version {target}"),
            );
            match self.within(self.metadata.append_version(&version, file.current_version)).await {
                Ok(Ok(())) => {
                    info!(file_id = %file_id, new_version, reverted_to = target, "file reverted");
                    return Ok(RevertReceipt {
                        file_id: file_id.to_string(),
                        new_version,
                        reverted_to: target,
                    });
                },
                Ok(Err(e)) if matches!(e.deref(), MetadataErrorKind::Conflict(_)) && attempt < REVERT_ATTEMPTS => {
                    debug!(file_id = %file_id, attempt, "lost the race for the next version, retrying");
                    attempt += 1;
                },
                Ok(Err(e)) => return Err(e).or_raise(|| ErrorKind::MetadataWrite),
                Err(elapsed) => return Err(elapsed).or_raise(|| ErrorKind::MetadataWrite),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ErrorKind;
    use crate::testing::{Fault, harness, request};
    use cairn_metadata::{FileVersion, MetadataStore};
    use rstest::rstest;
    use time::UtcDateTime;

    #[tokio::test]
    async fn test_revert_appends_version() {
        let h = harness(&[]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        let reverted = h.vault.revert(&receipt.file_id, 1).await.unwrap();
        assert_eq!(reverted.new_version, 2);
        assert_eq!(reverted.reverted_to, 1);

        let versions = h.repo.list_versions(&receipt.file_id).await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].path, versions[0].path);
        assert_eq!(versions[1].commit_message, "Revert to version 1");
        // The blob is reused, not copied.
        assert_eq!(h.mock.len().await, 1);

        let meta = h.vault.metadata(&receipt.file_id, None).await.unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!(meta.current_version, 2);
    }

    #[tokio::test]
    async fn test_revert_restores_older_snapshot() {
        let h = harness(&[]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        // A second version with other content, as if written by another client.
        let v2 = FileVersion::new(
            &receipt.file_id,
            2,
            11,
            "alice/202401/other",
            "text/plain",
            UtcDateTime::now(),
            "edit",
        );
        h.repo.append_version(&v2, 1).await.unwrap();

        h.vault.revert(&receipt.file_id, 1).await.unwrap();
        let file = h.repo.get_file(&receipt.file_id).await.unwrap().unwrap();
        assert_eq!(file.current_version, 3);
        assert_eq!(file.size, 5);
        assert!(file.path.ends_with(&receipt.file_id));
    }

    #[rstest]
    #[case(0)]
    #[case(-1)]
    #[tokio::test]
    async fn test_non_positive_target_is_invalid(#[case] target: i64) {
        let h = harness(&[]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        let err = h.vault.revert(&receipt.file_id, target).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_target_is_not_found() {
        let h = harness(&[]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        let err = h.vault.revert(&receipt.file_id, 7).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = h.vault.revert("missing", 1).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_write_failure_is_metadata_write() {
        let h = harness(&[("append_version", Fault::Fail)]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        let err = h.vault.revert(&receipt.file_id, 1).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MetadataWrite));
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[tokio::test]
    async fn test_lost_races_are_retried(#[case] conflicts: u32) {
        let h = harness(&[("append_version", Fault::Conflict(conflicts))]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        let reverted = h.vault.revert(&receipt.file_id, 1).await.unwrap();
        assert_eq!(reverted.new_version, 2);
        assert_eq!(h.repo.list_versions(&receipt.file_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_revert_gives_up_after_three_lost_races() {
        let h = harness(&[("append_version", Fault::Conflict(3))]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        let err = h.vault.revert(&receipt.file_id, 1).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MetadataWrite));
        assert_eq!(h.repo.list_versions(&receipt.file_id).await.unwrap().len(), 1);
        // The next revert finds the store cooperative again.
        assert_eq!(h.vault.revert(&receipt.file_id, 1).await.unwrap().new_version, 2);
    }

    #[tokio::test]
    async fn test_trashed_file_cannot_be_reverted() {
        let h = harness(&[]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        h.vault.delete(&receipt.file_id).await.unwrap();
        let err = h.vault.revert(&receipt.file_id, 1).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
