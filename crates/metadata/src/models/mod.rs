mod file;
mod query;
mod tag;
mod version;

pub(crate) use self::file::FileRow;
pub use self::file::{File, FileStatus};
pub use self::query::{FileDetails, FileQuery, Page, SortDirection, SortKey, TimeRange};
pub use self::tag::Tag;
pub(crate) use self::version::VersionRow;
pub use self::version::FileVersion;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

/// Timestamps are stored as Unix seconds.
fn timestamp(seconds: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(seconds).or_raise(|| ErrorKind::InvalidData(field))
}
