use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use blob_store::{BlobStorageConfig, BlobStore, BlobStoreError, PutResult};
use bytes::Bytes;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    config::ServerConfig,
    data_model::FileRecord,
    identity::IdentityGenerator,
    service::Service,
    state_store::{MetadataStore, MetadataStoreConfig, MetadataStoreError},
};

pub fn init_test_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
    let _ = subscriber::set_global_default(
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
    );
}

/// A service backed by RocksDB and a `file://` blob store in a temp dir.
pub struct TestService {
    pub service: Service,
    pub config: ServerConfig,
    _temp_dir: tempfile::TempDir,
}

impl TestService {
    pub async fn new() -> Result<Self> {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut ServerConfig)) -> Result<Self> {
        init_test_tracing();

        let temp_dir = tempfile::tempdir()?;
        let mut config = ServerConfig {
            metadata_store: MetadataStoreConfig {
                path: temp_dir.path().join("metadata").display().to_string(),
                ..Default::default()
            },
            blob_storage: BlobStorageConfig::new(
                &temp_dir.path().join("blobs").display().to_string(),
                "files",
            ),
            ..Default::default()
        };
        customize(&mut config);

        let service = Service::new(config.clone()).await?;
        Ok(Self {
            service,
            config,
            _temp_dir: temp_dir,
        })
    }
}

/// Always hands out the same id.
pub struct FixedIdentityGenerator {
    id: String,
}

impl FixedIdentityGenerator {
    pub fn new(id: &str) -> Self {
        Self { id: id.to_string() }
    }
}

impl IdentityGenerator for FixedIdentityGenerator {
    fn generate(&self, _original_file_name: &str) -> String {
        self.id.clone()
    }
}

/// In-memory metadata table. With a delay, each put lands from a spawned
/// task, the way a RocksDB write on the blocking pool does, so the write
/// completes even if the caller stops waiting for it.
#[derive(Default)]
pub struct FakeMetadataStore {
    records: Arc<Mutex<HashMap<String, FileRecord>>>,
    fail_puts: bool,
    fail_deletes: bool,
    delay: Option<Duration>,
    put_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FakeMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_puts(mut self) -> Self {
        self.fail_puts = true;
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.lock().unwrap().contains_key(id)
    }

    pub fn record(&self, id: &str) -> Option<FileRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    async fn put(&self, record: &FileRecord) -> Result<(), MetadataStoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            return Err(MetadataStoreError::TableNotFound {
                table: "files".to_string(),
            });
        }
        let records = self.records.clone();
        let record = record.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            records.lock().unwrap().insert(record.id.clone(), record);
        })
        .await
        .map_err(|e| MetadataStoreError::Internal {
            message: e.to_string(),
        })
    }

    async fn delete(&self, id: &str) -> Result<(), MetadataStoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes {
            return Err(MetadataStoreError::Internal {
                message: "injected delete failure".to_string(),
            });
        }
        self.records.lock().unwrap().remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>, MetadataStoreError> {
        Ok(self.record(id))
    }
}

/// In-memory bucket. Delayed puts land from a spawned task, like an object
/// store upload that is already on the wire.
pub struct FakeBlobStore {
    bucket: String,
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    fail_puts: bool,
    delay: Option<Duration>,
    put_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl FakeBlobStore {
    pub fn new(bucket: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            objects: Arc::new(Mutex::new(HashMap::new())),
            fail_puts: false,
            delay: None,
            put_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_puts(mut self) -> Self {
        self.fail_puts = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for FakeBlobStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutResult, BlobStoreError> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts || bucket != self.bucket {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            return Err(BlobStoreError::BucketNotFound {
                bucket: bucket.to_string(),
            });
        }
        let size_bytes = data.len() as u64;
        let objects = self.objects.clone();
        let owned_key = key.to_string();
        let delay = self.delay;
        tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            objects.lock().unwrap().insert(owned_key, data);
        })
        .await
        .expect("fake blob write panicked");
        Ok(PutResult {
            url: format!("memory:///{bucket}/{key}"),
            size_bytes,
            sha256_hash: String::new(),
            etag: None,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if bucket != self.bucket {
            return Err(BlobStoreError::BucketNotFound {
                bucket: bucket.to_string(),
            });
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }
}
