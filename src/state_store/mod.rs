//! The metadata half of an upload.
//!
//! [`MetadataStore`] is the capability the upload saga needs from the
//! key-value table holding [`FileRecord`]s. The production implementation
//! lives in [`rocksdb`], where a column family plays the role of the table.

use std::{env, path::PathBuf, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::data_model::FileRecord;

pub mod rocksdb;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataStoreConfig {
    pub path: String,
    pub table: String,
    /// When false, a table missing from an existing database is reported as
    /// [`MetadataStoreError::TableNotFound`] on every call instead of being
    /// created at startup.
    pub create_table_if_missing: bool,
}

impl Default for MetadataStoreConfig {
    fn default() -> Self {
        let path = env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("filevault_storage/metadata");
        MetadataStoreConfig {
            path: path.display().to_string(),
            table: "files".to_string(),
            create_table_if_missing: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MetadataStoreError {
    #[error("Failed to open metadata database at {path}. error: {source}")]
    OpenDatabaseFailed {
        path: String,
        source: ::rocksdb::Error,
    },

    #[error("metadata table not found: {table}")]
    TableNotFound { table: String },

    #[error("metadata store is throttling requests. error: {source}")]
    Throttled { source: ::rocksdb::Error },

    #[error("metadata store unavailable. error: {source}")]
    Unavailable { source: ::rocksdb::Error },

    #[error("metadata store call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Failed to encode record {id}. error: {source}")]
    EncodeFailed {
        id: String,
        source: serde_json::Error,
    },

    #[error("Failed to decode record {id}. error: {source}")]
    DecodeFailed {
        id: String,
        source: serde_json::Error,
    },

    #[error("metadata store task failed: {message}")]
    Internal { message: String },
}

impl MetadataStoreError {
    /// Classifies a failure reported by the database engine.
    pub fn from_rocksdb(source: ::rocksdb::Error) -> Self {
        match source.kind() {
            ::rocksdb::ErrorKind::Busy | ::rocksdb::ErrorKind::TryAgain => {
                Self::Throttled { source }
            }
            _ => Self::Unavailable { source },
        }
    }
}

/// Key-value access to [`FileRecord`]s by primary key `id`.
///
/// Every call completes before it returns; callers may rely on a successful
/// `put` being visible to a following `get`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Inserts the record, overwriting any record with the same id.
    async fn put(&self, record: &FileRecord) -> Result<(), MetadataStoreError>;

    /// Removes the record. Deleting an id that is not present succeeds.
    async fn delete(&self, id: &str) -> Result<(), MetadataStoreError>;

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, MetadataStoreError>;
}
