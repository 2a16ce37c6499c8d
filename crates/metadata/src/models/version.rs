use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::UtcDateTime;

/// One entry in a file's append-only version history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    pub version_id: String,
    pub file_id: String,
    pub version_number: u32,
    pub size: u64,
    /// Blob key holding this version's bytes. Several versions may share one.
    pub path: String,
    pub content_type: String,
    pub created_at: UtcDateTime,
    pub commit_message: String,
}

impl FileVersion {
    /// Build a version, deriving its id from the file id and number.
    pub fn new(
        file_id: impl Into<String>,
        version_number: u32,
        size: u64,
        path: impl Into<String>,
        content_type: impl Into<String>,
        created_at: UtcDateTime,
        commit_message: impl Into<String>,
    ) -> Self {
        let file_id = file_id.into();
        Self {
            version_id: Self::id_for(&file_id, version_number),
            file_id,
            version_number,
            size,
            path: path.into(),
            content_type: content_type.into(),
            created_at,
            commit_message: commit_message.into(),
        }
    }

    /// Version ids are `{file_id}:v{number}`.
    #[must_use]
    pub fn id_for(file_id: &str, version_number: u32) -> String {
        format!("{file_id}:v{version_number}")
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct VersionRow {
    pub version_id: String,
    pub file_id: String,
    pub version_number: i64,
    pub size: i64,
    pub path: String,
    pub content_type: String,
    pub created_at: i64,
    pub commit_message: String,
}
impl TryFrom<&FileVersion> for VersionRow {
    type Error = Error;
    fn try_from(version: &FileVersion) -> Result<Self, Self::Error> {
        Ok(Self {
            version_id: version.version_id.clone(),
            file_id: version.file_id.clone(),
            version_number: i64::from(version.version_number),
            size: i64::try_from(version.size).or_raise(|| ErrorKind::InvalidData("version size"))?,
            path: version.path.clone(),
            content_type: version.content_type.clone(),
            created_at: version.created_at.unix_timestamp(),
            commit_message: version.commit_message.clone(),
        })
    }
}
impl TryFrom<VersionRow> for FileVersion {
    type Error = Error;
    fn try_from(row: VersionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            version_id: row.version_id,
            file_id: row.file_id,
            version_number: u32::try_from(row.version_number)
                .or_raise(|| ErrorKind::InvalidData("version number"))?,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("version size"))?,
            path: row.path,
            content_type: row.content_type,
            created_at: super::timestamp(row.created_at, "version created at")?,
            commit_message: row.commit_message,
        })
    }
}
