//! SQL implementation of [`MetadataStore`].
//!
//! Queries are portable between SQLite and PostgreSQL: numbered `$N`
//! placeholders, `ON CONFLICT DO NOTHING`, and nothing engine specific.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{File, FileDetails, FileQuery, FileRow, FileVersion, Page, Tag, TimeRange, VersionRow};
use crate::store::MetadataStore;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::{AnyConnection, AnyPool};
use std::collections::HashMap;
use time::UtcDateTime;

const FILE_COLUMNS: &str = "f.file_id, f.user_id, f.file_name, f.file_type, f.content_type, f.size, f.path, \
    f.created_at, f.updated_at, f.current_version, f.description, f.status, f.trashed_at";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error().is_some_and(|e| e.is_unique_violation())
}

/// Escape `LIKE` wildcards so user input only ever matches literally.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Bind values for dynamically assembled queries.
enum Value {
    Text(String),
    Int(i64),
}

/// Collects bind values and hands out their `$N` placeholders.
#[derive(Default)]
struct Arguments {
    values: Vec<Value>,
}
impl Arguments {
    fn push(&mut self, value: Value) -> String {
        self.values.push(value);
        format!("${}", self.values.len())
    }

    fn text(&mut self, value: impl Into<String>) -> String {
        self.push(Value::Text(value.into()))
    }

    fn int(&mut self, value: i64) -> String {
        self.push(Value::Int(value))
    }

    fn range(&mut self, clauses: &mut Vec<String>, column: &str, range: &TimeRange) {
        if let Some(from) = range.from {
            clauses.push(format!("{column} >= {}", self.int(from.unix_timestamp())));
        }
        if let Some(to) = range.to {
            clauses.push(format!("{column} <= {}", self.int(to.unix_timestamp())));
        }
    }
}

/// Repository for files, versions and tags.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: AnyPool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    async fn fetch_file(&self, sql: &'static str, file_id: &str) -> Result<Option<File>> {
        let row: Option<FileRow> = sqlx::query_as(sql)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(File::try_from).transpose()
    }

    /// Find-or-create each tag and link it to the file, on the caller's
    /// transaction.
    async fn link_tags(conn: &mut AnyConnection, file_id: &str, names: &[String]) -> Result<Vec<Tag>> {
        let mut tags = Vec::with_capacity(names.len());
        for name in names {
            let tag = Tag::new(name.as_str());
            sqlx::query(include_str!("../queries/insert_tag.sql"))
                .bind(tag.tag_id.as_str())
                .bind(tag.name.as_str())
                .execute(&mut *conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
            let tag: Tag = sqlx::query_as(include_str!("../queries/find_tag.sql"))
                .bind(tag.name.as_str())
                .fetch_one(&mut *conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
            sqlx::query(include_str!("../queries/attach_tag.sql"))
                .bind(file_id)
                .bind(tag.tag_id.as_str())
                .execute(&mut *conn)
                .await
                .or_raise(|| ErrorKind::Database)?;
            if !tags.contains(&tag) {
                tags.push(tag);
            }
        }
        Ok(tags)
    }
}

#[async_trait]
impl MetadataStore for Repository {
    async fn file_record(&self, file_id: &str) -> Result<Option<File>> {
        self.fetch_file(include_str!("../queries/get_file_record.sql"), file_id).await
    }

    async fn get_file(&self, file_id: &str) -> Result<Option<File>> {
        self.fetch_file(include_str!("../queries/get_file.sql"), file_id).await
    }

    async fn get_version(&self, file_id: &str, version_number: u32) -> Result<Option<FileVersion>> {
        let row: Option<VersionRow> = sqlx::query_as(include_str!("../queries/get_version.sql"))
            .bind(file_id)
            .bind(i64::from(version_number))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FileVersion::try_from).transpose()
    }

    async fn list_versions(&self, file_id: &str) -> Result<Vec<FileVersion>> {
        let rows: Vec<VersionRow> = sqlx::query_as(include_str!("../queries/list_versions.sql"))
            .bind(file_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(FileVersion::try_from).collect()
    }

    async fn create_file(&self, file: &File, version: &FileVersion) -> Result<()> {
        if version.file_id != file.file_id || version.version_number != file.current_version {
            exn::bail!(ErrorKind::InvalidData("first version does not belong to file"));
        }
        let file_row = FileRow::try_from(file)?;
        let version_row = VersionRow::try_from(version)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let inserted = sqlx::query(include_str!("../queries/insert_file.sql"))
            .bind(file_row.file_id)
            .bind(file_row.user_id)
            .bind(file_row.file_name)
            .bind(file_row.file_type)
            .bind(file_row.content_type)
            .bind(file_row.size)
            .bind(file_row.path)
            .bind(file_row.created_at)
            .bind(file_row.updated_at)
            .bind(file_row.current_version)
            .bind(file_row.description)
            .bind(file_row.status)
            .bind(file_row.trashed_at)
            .execute(&mut *tx)
            .await;
        match inserted {
            Err(err) if is_unique_violation(&err) => exn::bail!(ErrorKind::Duplicate(file.file_id.clone())),
            result => result.or_raise(|| ErrorKind::Database)?,
        };
        sqlx::query(include_str!("../queries/insert_version.sql"))
            .bind(version_row.version_id)
            .bind(version_row.file_id)
            .bind(version_row.version_number)
            .bind(version_row.size)
            .bind(version_row.path)
            .bind(version_row.content_type)
            .bind(version_row.created_at)
            .bind(version_row.commit_message)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn attach_tags(&self, file_id: &str, names: &[String]) -> Result<Vec<Tag>> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let tags = Self::link_tags(&mut tx, file_id, names).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(tags)
    }

    async fn find_tag(&self, name: &str) -> Result<Option<Tag>> {
        sqlx::query_as(include_str!("../queries/find_tag.sql"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    async fn tags_for_file(&self, file_id: &str) -> Result<Vec<String>> {
        sqlx::query_scalar(include_str!("../queries/tags_for_file.sql"))
            .bind(file_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    async fn tags_for_files(&self, file_ids: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        if file_ids.is_empty() {
            return Ok(map);
        }
        let placeholders: Vec<String> = (1..=file_ids.len()).map(|n| format!("${n}")).collect();
        let sql = format!(
            "SELECT ft.file_id, t.name FROM file_tags ft INNER JOIN tags t ON t.tag_id = ft.tag_id \
             WHERE ft.file_id IN ({}) ORDER BY t.name ASC",
            placeholders.join(", ")
        );
        let mut query = sqlx::query_as::<_, (String, String)>(&sql);
        for file_id in file_ids {
            query = query.bind(file_id.as_str());
        }
        let rows = query.fetch_all(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        for (file_id, name) in rows {
            map.entry(file_id).or_default().push(name);
        }
        Ok(map)
    }

    async fn list_files(&self, query: &FileQuery) -> Result<Page<File>> {
        let mut args = Arguments::default();
        let mut join = String::new();
        if let Some(tag_id) = &query.tag_id {
            join = format!(
                " INNER JOIN file_tags ft ON ft.file_id = f.file_id AND ft.tag_id = {}",
                args.text(tag_id.as_str())
            );
        }
        let mut clauses = vec!["f.trashed_at IS NULL".to_string()];
        if let Some(owner) = &query.owner {
            clauses.push(format!("f.user_id = {}", args.text(owner.as_str())));
        }
        if let Some(name) = &query.name_contains {
            let pattern = format!("%{}%", escape_like(name));
            clauses.push(format!("f.file_name LIKE {} ESCAPE '\\'", args.text(pattern)));
        }
        if let Some(file_type) = &query.file_type {
            clauses.push(format!("f.file_type = {}", args.text(file_type.as_str())));
        }
        args.range(&mut clauses, "f.created_at", &query.created);
        args.range(&mut clauses, "f.updated_at", &query.updated);
        let from = format!("FROM files f{join} WHERE {}", clauses.join(" AND "));

        let filter_count = args.values.len();
        let count_sql = format!("SELECT COUNT(*) {from}");
        let mut count = sqlx::query_scalar::<_, i64>(&count_sql);
        for value in &args.values[..filter_count] {
            count = match value {
                Value::Text(text) => count.bind(text.as_str()),
                Value::Int(int) => count.bind(*int),
            };
        }
        let total = count.fetch_one(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        let total = u64::try_from(total).or_raise(|| ErrorKind::InvalidData("row count"))?;
        if total == 0 || query.limit == 0 {
            return Ok(Page { items: Vec::new(), total });
        }

        let limit = args.int(i64::from(query.limit));
        let offset = args.int(i64::try_from(query.offset).or_raise(|| ErrorKind::InvalidData("offset"))?);
        let direction = query.direction.keyword();
        let page_sql = format!(
            "SELECT {FILE_COLUMNS} {from} ORDER BY {} {direction}, f.file_id {direction} LIMIT {limit} OFFSET {offset}",
            query.sort.column(),
        );
        let mut page = sqlx::query_as::<_, FileRow>(&page_sql);
        for value in &args.values {
            page = match value {
                Value::Text(text) => page.bind(text.as_str()),
                Value::Int(int) => page.bind(*int),
            };
        }
        let rows = page.fetch_all(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        let items = rows.into_iter().map(File::try_from).collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }

    async fn append_version(&self, version: &FileVersion, expected_current: u32) -> Result<()> {
        if Some(version.version_number) != expected_current.checked_add(1) {
            exn::bail!(ErrorKind::InvalidData("version number must follow the current version"));
        }
        let row = VersionRow::try_from(version)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let bumped = sqlx::query(include_str!("../queries/bump_version.sql"))
            .bind(row.version_number)
            .bind(row.path.as_str())
            .bind(row.content_type.as_str())
            .bind(row.size)
            .bind(row.created_at)
            .bind(row.file_id.as_str())
            .bind(i64::from(expected_current))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if bumped.rows_affected() == 0 {
            // Dropping the transaction rolls it back.
            exn::bail!(ErrorKind::Conflict(version.file_id.clone()));
        }
        let inserted = sqlx::query(include_str!("../queries/insert_version.sql"))
            .bind(row.version_id.as_str())
            .bind(row.file_id.as_str())
            .bind(row.version_number)
            .bind(row.size)
            .bind(row.path.as_str())
            .bind(row.content_type.as_str())
            .bind(row.created_at)
            .bind(row.commit_message.as_str())
            .execute(&mut *tx)
            .await;
        match inserted {
            Err(err) if is_unique_violation(&err) => exn::bail!(ErrorKind::Conflict(version.file_id.clone())),
            result => result.or_raise(|| ErrorKind::Database)?,
        };
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn update_details(
        &self,
        file_id: &str,
        details: &FileDetails,
        tags: Option<&[String]>,
        at: UtcDateTime,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let result = sqlx::query(include_str!("../queries/update_details.sql"))
            .bind(details.file_name.clone())
            .bind(details.file_type.clone())
            .bind(details.description.clone())
            .bind(at.unix_timestamp())
            .bind(file_id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            return Ok(false);
        }
        if let Some(names) = tags {
            sqlx::query(include_str!("../queries/clear_tags.sql"))
                .bind(file_id)
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            Self::link_tags(&mut tx, file_id, names).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(true)
    }

    async fn trash(&self, file_ids: &[String], at: UtcDateTime) -> Result<Vec<String>> {
        let mut trashed = Vec::new();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for file_id in file_ids {
            let result = sqlx::query(include_str!("../queries/trash_file.sql"))
                .bind(at.unix_timestamp())
                .bind(file_id.as_str())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            if result.rows_affected() > 0 && !trashed.contains(file_id) {
                trashed.push(file_id.clone());
            }
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(trashed)
    }
}
