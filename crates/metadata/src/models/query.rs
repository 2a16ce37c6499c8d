use time::UtcDateTime;

/// Column to order a listing by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Size,
    Type,
    /// Last update time.
    #[default]
    Date,
}
impl SortKey {
    pub(crate) fn column(self) -> &'static str {
        match self {
            Self::Name => "f.file_name",
            Self::Size => "f.size",
            Self::Type => "f.file_type",
            Self::Date => "f.updated_at",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}
impl SortDirection {
    pub(crate) fn keyword(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Inclusive time bounds; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<UtcDateTime>,
    pub to: Option<UtcDateTime>,
}

/// Filters, ordering and window for [`MetadataStore::list_files`](crate::MetadataStore::list_files).
///
/// All filters are optional and combined with AND. Trashed files never match.
#[derive(Debug, Clone, Default)]
pub struct FileQuery {
    pub owner: Option<String>,
    /// Substring of the file name; `%` and `_` match literally.
    pub name_contains: Option<String>,
    pub file_type: Option<String>,
    pub created: TimeRange,
    pub updated: TimeRange,
    /// Only files carrying this tag.
    pub tag_id: Option<String>,
    pub sort: SortKey,
    pub direction: SortDirection,
    pub limit: u32,
    pub offset: u64,
}

/// One window of a listing, with the size of the whole result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Descriptive fields that can be changed without creating a new version.
/// `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct FileDetails {
    pub file_name: Option<String>,
    pub file_type: Option<String>,
    pub description: Option<String>,
}
