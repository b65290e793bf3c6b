use std::{path::PathBuf, sync::Arc};

use ::rocksdb::{Options, DB, DEFAULT_COLUMN_FAMILY_NAME};
use async_trait::async_trait;
use opentelemetry::KeyValue;
use tokio::task;
use tracing::{debug, info, warn};

use super::{MetadataStore, MetadataStoreConfig, MetadataStoreError};
use crate::{
    data_model::FileRecord,
    metrics::{metadata_storage::Metrics, Timer},
};

/// RocksDB backed metadata table. The configured table maps to a column
/// family; records are stored as JSON under their id.
pub struct RocksDBMetadataStore {
    db: Arc<DB>,
    table: String,
    metrics: Metrics,
}

impl RocksDBMetadataStore {
    pub fn open(config: &MetadataStoreConfig) -> Result<Self, MetadataStoreError> {
        let path = PathBuf::from(&config.path);
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let mut column_families = DB::list_cf(&db_opts, &path)
            .unwrap_or_else(|_| vec![DEFAULT_COLUMN_FAMILY_NAME.to_string()]);
        if !column_families.contains(&config.table) {
            if config.create_table_if_missing {
                column_families.push(config.table.clone());
            } else {
                warn!(
                    "metadata table {} does not exist in {} and will not be created",
                    config.table,
                    path.display()
                );
            }
        }

        info!(
            "opening metadata store at {} with table {}",
            path.display(),
            config.table
        );
        let db = DB::open_cf(&db_opts, &path, &column_families).map_err(|source| {
            MetadataStoreError::OpenDatabaseFailed {
                path: path.display().to_string(),
                source,
            }
        })?;

        Ok(Self {
            db: Arc::new(db),
            table: config.table.clone(),
            metrics: Metrics::new(),
        })
    }

    /// Runs a closure against the table's column family on the blocking
    /// thread pool.
    async fn with_table<T, F>(&self, op: F) -> Result<T, MetadataStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&DB, &::rocksdb::ColumnFamily) -> Result<T, MetadataStoreError> + Send + 'static,
    {
        let db = self.db.clone();
        let table = self.table.clone();
        task::spawn_blocking(move || {
            let cf = db
                .cf_handle(&table)
                .ok_or(MetadataStoreError::TableNotFound { table })?;
            op(&db, cf)
        })
        .await
        .map_err(|e| MetadataStoreError::Internal {
            message: e.to_string(),
        })?
    }
}

#[async_trait]
impl MetadataStore for RocksDBMetadataStore {
    async fn put(&self, record: &FileRecord) -> Result<(), MetadataStoreError> {
        let labels = &[KeyValue::new("op", "put")];
        let _timer = Timer::start_with_labels(&self.metrics.writes, labels);

        let value =
            serde_json::to_vec(record).map_err(|source| MetadataStoreError::EncodeFailed {
                id: record.id.clone(),
                source,
            })?;
        let key = record.id.clone();
        self.with_table(move |db, cf| {
            db.put_cf(cf, key.as_bytes(), value)
                .map_err(MetadataStoreError::from_rocksdb)
        })
        .await?;
        debug!("stored metadata record {}", record.id);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), MetadataStoreError> {
        let labels = &[KeyValue::new("op", "delete")];
        let _timer = Timer::start_with_labels(&self.metrics.writes, labels);

        let key = id.to_string();
        self.with_table(move |db, cf| {
            db.delete_cf(cf, key.as_bytes())
                .map_err(MetadataStoreError::from_rocksdb)
        })
        .await
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, MetadataStoreError> {
        let labels = &[KeyValue::new("op", "get")];
        let _timer = Timer::start_with_labels(&self.metrics.reads, labels);

        let key = id.to_string();
        self.with_table(move |db, cf| {
            let Some(value) = db
                .get_cf(cf, key.as_bytes())
                .map_err(MetadataStoreError::from_rocksdb)?
            else {
                return Ok(None);
            };
            serde_json::from_slice(&value)
                .map(Some)
                .map_err(|source| MetadataStoreError::DecodeFailed { id: key, source })
        })
        .await
    }
}
