use crate::Vault;
use crate::error::{ErrorKind, Result};
use crate::models::{LineChanges, VersionDiff, VersionInfo};
use bytes::Bytes;
use cairn_metadata::FileVersion;
use exn::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::path::Path;

/// Count lines present in `to` but not `from` and vice versa, ignoring order.
fn line_changes(from: &str, to: &str) -> LineChanges {
    let mut balance: HashMap<&str, i64> = HashMap::new();
    for line in from.lines() {
        *balance.entry(line).or_default() -= 1;
    }
    for line in to.lines() {
        *balance.entry(line).or_default() += 1;
    }
    balance.values().fold(LineChanges::default(), |mut changes, &n| {
        if n > 0 {
            changes.added += n.unsigned_abs();
        } else {
            changes.removed += n.unsigned_abs();
        }
        changes
    })
}

impl Vault {
    /// Every version of a live file, oldest first.
    pub async fn versions(&self, file_id: &str) -> Result<Vec<VersionInfo>> {
        let file = self.live_file(file_id).await?;
        let versions = self.bounded(self.metadata.list_versions(file_id), || ErrorKind::MetadataRead).await?;
        Ok(versions.into_iter().map(|v| VersionInfo::new(v, file.current_version)).collect())
    }

    /// Compare two versions of a file.
    ///
    /// Line changes are only counted when both versions are textual, which
    /// means reading both blobs in full.
    pub async fn diff(&self, file_id: &str, from: i64, to: i64) -> Result<VersionDiff> {
        self.live_file(file_id).await?;
        let from = self.version(file_id, from).await?;
        let to = self.version(file_id, to).await?;

        let textual = cairn_address::is_textual(&from.content_type) && cairn_address::is_textual(&to.content_type);
        let (same_content, lines) = if from.path == to.path {
            (true, textual.then(LineChanges::default))
        } else if textual {
            let (old, new) = (self.read_blob(&from.path).await?, self.read_blob(&to.path).await?);
            let lines = line_changes(&String::from_utf8_lossy(&old), &String::from_utf8_lossy(&new));
            (old == new, Some(lines))
        } else if from.size == to.size {
            (self.read_blob(&from.path).await? == self.read_blob(&to.path).await?, None)
        } else {
            (false, None)
        };

        // Blobs are capped well below `i64::MAX` bytes.
        let size_delta = to.size as i64 - from.size as i64;
        Ok(VersionDiff {
            from: from.version_number,
            to: to.version_number,
            same_content,
            size_delta,
            content_type_changed: from.content_type != to.content_type,
            lines,
        })
    }

    async fn version(&self, file_id: &str, number: i64) -> Result<FileVersion> {
        if number <= 0 {
            exn::bail!(ErrorKind::validation(format!("version {number} is not a positive number")));
        }
        let not_found = || ErrorKind::NotFound(format!("version {number} of file {file_id}"));
        let number = u32::try_from(number).or_raise(not_found)?;
        self.bounded(self.metadata.get_version(file_id, number), || ErrorKind::MetadataRead)
            .await?
            .ok_or_raise(not_found)
    }

    async fn read_blob(&self, path: &str) -> Result<Bytes> {
        self.bounded(self.blobs.read(Path::new(path)), || ErrorKind::StorageRead).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UploadRequest;
    use crate::testing::{Harness, harness, request};
    use cairn_metadata::MetadataStore;
    use cairn_storage::StorageBackend;
    use rstest::rstest;
    use time::UtcDateTime;

    #[rstest]
    #[case("a\nb\n", "a\nb\n", 0, 0)]
    #[case("a\nb\n", "a\nc\n", 1, 1)]
    #[case("a\n", "a\na\nb\n", 2, 0)]
    #[case("a\nb\nc\n", "c\nb\na\n", 0, 0)]
    #[case("a\nb\n", "", 0, 2)]
    fn test_line_changes(#[case] from: &str, #[case] to: &str, #[case] added: u64, #[case] removed: u64) {
        assert_eq!(line_changes(from, to), LineChanges { added, removed });
    }

    /// Give the file a second version with `content`, stored as its own blob.
    async fn edit(h: &Harness, file_id: &str, content: &'static str, content_type: &str) {
        let path = format!("alice/202401/{file_id}-2");
        h.mock.write(Path::new(&path), Bytes::from_static(content.as_bytes()), None).await.unwrap();
        let version =
            FileVersion::new(file_id, 2, content.len() as u64, path, content_type, UtcDateTime::now(), "edit");
        h.repo.append_version(&version, 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_versions_are_ascending() {
        let h = harness(&[]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        h.vault.revert(&receipt.file_id, 1).await.unwrap();
        let versions = h.vault.versions(&receipt.file_id).await.unwrap();
        let numbers: Vec<u32> = versions.iter().map(|v| v.version).collect();
        assert_eq!(numbers, [1, 2]);
        assert!(!versions[0].current);
        assert!(versions[1].current);
        assert_eq!(versions[1].commit_message, "Revert to version 1");
    }

    #[tokio::test]
    async fn test_versions_of_missing_file() {
        let h = harness(&[]).await;
        let err = h.vault.versions("missing").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_diff_of_revert_is_same_content() {
        let h = harness(&[]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        h.vault.revert(&receipt.file_id, 1).await.unwrap();
        let diff = h.vault.diff(&receipt.file_id, 1, 2).await.unwrap();
        assert!(diff.same_content);
        assert_eq!(diff.size_delta, 0);
        assert!(!diff.content_type_changed);
        assert_eq!(diff.lines, Some(LineChanges::default()));
    }

    #[tokio::test]
    async fn test_diff_counts_lines() {
        let h = harness(&[]).await;
        let receipt = h
            .vault
            .upload(UploadRequest {
                payload: Bytes::from_static(b"one\ntwo\n"),
                ..request("notes.txt", "")
            })
            .await
            .unwrap();
        edit(&h, &receipt.file_id, "one\nthree\nfour\n", &receipt.content_type).await;
        let diff = h.vault.diff(&receipt.file_id, 1, 2).await.unwrap();
        assert!(!diff.same_content);
        assert_eq!(diff.size_delta, 7);
        assert_eq!(diff.lines, Some(LineChanges { added: 2, removed: 1 }));
    }

    #[tokio::test]
    async fn test_diff_of_binary_versions() {
        let h = harness(&[]).await;
        let receipt = h
            .vault
            .upload(UploadRequest {
                payload: Bytes::from_static(b"\x89PNG\r\n\x1a\nAAAA"),
                ..request("image.png", "")
            })
            .await
            .unwrap();
        edit(&h, &receipt.file_id, "\u{0}\u{1}\u{2}", "application/octet-stream").await;
        let diff = h.vault.diff(&receipt.file_id, 1, 2).await.unwrap();
        assert!(!diff.same_content);
        assert!(diff.content_type_changed);
        assert_eq!(diff.size_delta, -9);
        assert_eq!(diff.lines, None);
    }

    #[rstest]
    #[case(0, 1)]
    #[case(1, -2)]
    #[tokio::test]
    async fn test_diff_rejects_bad_selectors(#[case] from: i64, #[case] to: i64) {
        let h = harness(&[]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        let err = h.vault.diff(&receipt.file_id, from, to).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Validation(_)));
    }

    #[tokio::test]
    async fn test_diff_of_missing_version() {
        let h = harness(&[]).await;
        let receipt = h.vault.upload(request("notes.md", "hello")).await.unwrap();
        let err = h.vault.diff(&receipt.file_id, 1, 2).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }
}
