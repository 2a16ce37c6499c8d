use crate::Vault;
use crate::error::{ErrorKind, Result};
use crate::models::{FileMetadata, ListRequest, Listing};
use cairn_metadata::{FileQuery, SortDirection, SortKey, TimeRange};

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

fn sort_key(raw: Option<&str>) -> SortKey {
    match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("name") => SortKey::Name,
        Some("size") => SortKey::Size,
        Some("type") => SortKey::Type,
        _ => SortKey::Date,
    }
}

fn direction(raw: Option<&str>) -> SortDirection {
    match raw.map(str::trim) {
        Some(d) if d.eq_ignore_ascii_case("asc") => SortDirection::Asc,
        _ => SortDirection::Desc,
    }
}

/// Pages start at 1; a page size outside `1..=100` falls back to the default.
fn window(page: i64, page_size: i64) -> (u32, u32) {
    let page = u32::try_from(page.max(1)).unwrap_or(u32::MAX);
    let page_size = u32::try_from(page_size)
        .ok()
        .filter(|size| (1..=MAX_PAGE_SIZE).contains(size))
        .unwrap_or(DEFAULT_PAGE_SIZE);
    (page, page_size)
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl Vault {
    /// One page of live files matching every filter of `request`.
    ///
    /// Filtering by a tag nobody has used yields an empty page.
    pub async fn list(&self, request: &ListRequest) -> Result<Listing> {
        let (page, page_size) = window(request.page, request.page_size);
        let empty = Listing { items: Vec::new(), page, page_size, total: 0 };

        let tag_id = match non_blank(&request.tag) {
            None => None,
            Some(name) => match self.bounded(self.metadata.find_tag(&name), || ErrorKind::MetadataRead).await? {
                Some(tag) => Some(tag.tag_id),
                None => return Ok(empty),
            },
        };
        let query = FileQuery {
            owner: non_blank(&request.owner),
            name_contains: non_blank(&request.name),
            file_type: non_blank(&request.file_type),
            created: TimeRange { from: request.created_from, to: request.created_to },
            updated: TimeRange { from: request.updated_from, to: request.updated_to },
            tag_id,
            sort: sort_key(request.sort.as_deref()),
            direction: direction(request.direction.as_deref()),
            limit: page_size,
            offset: u64::from(page - 1) * u64::from(page_size),
        };
        let found = self.bounded(self.metadata.list_files(&query), || ErrorKind::MetadataRead).await?;
        if found.items.is_empty() {
            return Ok(Listing { total: found.total, ..empty });
        }

        let ids: Vec<String> = found.items.iter().map(|f| f.file_id.clone()).collect();
        let mut tags = self.bounded(self.metadata.tags_for_files(&ids), || ErrorKind::MetadataRead).await?;
        let items = found
            .items
            .into_iter()
            .map(|file| {
                let file_tags = tags.remove(&file.file_id).unwrap_or_default();
                FileMetadata::current(file, file_tags)
            })
            .collect();
        Ok(Listing { items, page, page_size, total: found.total })
    }
}
