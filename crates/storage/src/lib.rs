//! Blob storage for cairn.
//!
//! Payload bytes live here, keyed by opaque relative paths. Metadata about
//! those payloads lives elsewhere (see `cairn-metadata`); nothing in this
//! crate knows about files, versions or owners.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::{BlobStream, StorageBackend};
pub use crate::models::BlobInfo;
pub use crate::path::validate as validate_path;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
