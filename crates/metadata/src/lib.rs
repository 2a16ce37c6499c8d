//! Relational metadata store for the cairn vault.
//!
//! The store owns the lifecycle of four tables:
//! - **files**: one row per registered file, keyed by the content hash of its
//!   first upload, carrying a snapshot of the current version.
//! - **file_versions**: append-only history; `(file_id, version_number)` is
//!   unique and numbers are never reused.
//! - **tags** and **file_tags**: deduplicated labels and their links.
//!
//! Files are never physically deleted. Trashing sets a marker that every read
//! path filters on, except [`MetadataStore::file_record`].
//!
//! The engine is picked at runtime ([`Driver`]), and every query is written
//! to run unchanged on both SQLite and PostgreSQL.

mod db;
pub mod error;
mod models;
mod repo;
mod store;

pub use crate::db::{Database, Driver, PoolSettings};
pub use crate::models::{
    File, FileDetails, FileQuery, FileStatus, FileVersion, Page, SortDirection, SortKey, Tag, TimeRange,
};
pub use crate::repo::Repository;
pub use crate::store::{MetadataHandle, MetadataStore};
