use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use std::fmt;
use std::str::FromStr;
use time::UtcDateTime;

/// Lifecycle state of a file. Trashed files are invisible to every normal read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Active,
    Trashed,
}
impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Trashed => "trashed",
        })
    }
}
impl FromStr for FileStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "trashed" => Ok(Self::Trashed),
            _ => exn::bail!(ErrorKind::InvalidData("file status")),
        }
    }
}

/// One registered file: the snapshot of its current version plus ownership
/// and descriptive metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Content hash of the first version's bytes; never changes.
    pub file_id: String,
    pub owner: String,
    pub file_name: String,
    pub file_type: String,
    pub content_type: String,
    pub size: u64,
    /// Blob key of the current version.
    pub path: String,
    pub created_at: UtcDateTime,
    pub updated_at: UtcDateTime,
    pub current_version: u32,
    pub description: String,
    pub status: FileStatus,
    pub trashed_at: Option<UtcDateTime>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub file_id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_type: String,
    pub content_type: String,
    pub size: i64,
    pub path: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub current_version: i64,
    pub description: String,
    pub status: String,
    pub trashed_at: Option<i64>,
}
impl TryFrom<&File> for FileRow {
    type Error = Error;
    fn try_from(file: &File) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: file.file_id.clone(),
            user_id: file.owner.clone(),
            file_name: file.file_name.clone(),
            file_type: file.file_type.clone(),
            content_type: file.content_type.clone(),
            size: i64::try_from(file.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            path: file.path.clone(),
            created_at: file.created_at.unix_timestamp(),
            updated_at: file.updated_at.unix_timestamp(),
            current_version: i64::from(file.current_version),
            description: file.description.clone(),
            status: file.status.to_string(),
            trashed_at: file.trashed_at.map(UtcDateTime::unix_timestamp),
        })
    }
}
impl TryFrom<FileRow> for File {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: row.file_id,
            owner: row.user_id,
            file_name: row.file_name,
            file_type: row.file_type,
            content_type: row.content_type,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            path: row.path,
            created_at: super::timestamp(row.created_at, "created at")?,
            updated_at: super::timestamp(row.updated_at, "updated at")?,
            current_version: u32::try_from(row.current_version)
                .or_raise(|| ErrorKind::InvalidData("current version"))?,
            description: row.description,
            status: row.status.parse()?,
            trashed_at: row.trashed_at.map(|t| super::timestamp(t, "trashed at")).transpose()?,
        })
    }
}
