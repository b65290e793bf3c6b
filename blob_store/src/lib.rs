use std::{env, path::PathBuf, sync::Arc, time::Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt, TryStreamExt};
use object_store::{
    aws::{AmazonS3Builder, AmazonS3ConfigKey},
    parse_url,
    path::Path,
    ObjectStore,
    ObjectStoreScheme,
    PutPayload,
};
use opentelemetry::{metrics::Histogram, KeyValue};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

mod error;
pub use error::BlobStoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    /// Root URL of the object store: `file://`, `s3://<bucket>/<prefix>` or
    /// `memory://`.
    pub path: String,
    /// The single bucket every upload is written to.
    pub bucket: String,
    pub region: Option<String>,
}

impl BlobStorageConfig {
    pub fn new(path: &str, bucket: &str) -> Self {
        BlobStorageConfig {
            path: format!("file://{}", path),
            bucket: bucket.to_string(),
            region: None,
        }
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        let blob_store_path = format!(
            "file://{}",
            env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("filevault_storage/blobs")
                .display()
        );
        BlobStorageConfig {
            path: blob_store_path,
            bucket: "files".to_string(),
            region: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PutResult {
    pub url: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
    pub etag: Option<String>,
}

/// Content writes addressed by bucket and key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutResult, BlobStoreError>;

    /// Deleting a key that does not exist succeeds.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError>;
}

struct Metrics {
    operations: Histogram<f64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = opentelemetry::global::meter("blob-storage");
        let operations = meter
            .f64_histogram("filevault.blob_operations_duration")
            .with_unit("s")
            .with_description("blob store latencies in seconds")
            .build();
        Self { operations }
    }

    fn record(&self, op: &'static str, started: Instant) {
        self.operations
            .record(started.elapsed().as_secs_f64(), &[KeyValue::new("op", op)]);
    }
}

#[derive(Clone)]
pub struct BlobStorage {
    object_store: Arc<dyn ObjectStore>,
    root: Path,
    bucket: String,
    metrics: Arc<Metrics>,
}

impl BlobStorage {
    pub fn new(config: BlobStorageConfig) -> Result<Self, BlobStoreError> {
        if config.bucket.is_empty() {
            return Err(BlobStoreError::invalid_config("bucket name cannot be empty"));
        }
        let (object_store, root) = Self::build_object_store(&config)?;
        info!(
            "using blob store {} with bucket {}",
            config.path, config.bucket
        );
        Ok(Self {
            object_store: Arc::from(object_store),
            root,
            bucket: config.bucket,
            metrics: Arc::new(Metrics::new()),
        })
    }

    fn build_object_store(
        config: &BlobStorageConfig,
    ) -> Result<(Box<dyn ObjectStore>, Path), BlobStoreError> {
        let url = config.path.parse::<Url>().map_err(|e| {
            BlobStoreError::invalid_config(format!("invalid url {}: {}", config.path, e))
        })?;
        let (scheme, _) = ObjectStoreScheme::parse(&url).map_err(object_store::Error::from)?;
        match scheme {
            ObjectStoreScheme::AmazonS3 => {
                if url.host_str() != Some(config.bucket.as_str()) {
                    return Err(BlobStoreError::invalid_config(format!(
                        "s3 url {} does not address bucket {}",
                        config.path, config.bucket
                    )));
                }
                // inject AWS environment variables to prioritize keys over instance metadata
                // credentials.
                let opts: Vec<(AmazonS3ConfigKey, String)> = env::vars_os()
                    .filter_map(|(os_key, os_value)| {
                        let (key, value) = (os_key.to_str()?, os_value.to_str()?);
                        if !key.starts_with("AWS_") {
                            return None;
                        }
                        let config_key = key.to_ascii_lowercase().parse().ok()?;
                        Some((config_key, value.to_string()))
                    })
                    .collect();

                let mut s3_builder = AmazonS3Builder::new().with_url(url.as_str());
                for (key, value) in opts.iter() {
                    s3_builder = s3_builder.with_config(*key, value.clone());
                }
                if let Some(region) = &config.region {
                    s3_builder = s3_builder.with_region(region);
                }
                let s3 = s3_builder.build()?;
                let prefix =
                    Path::from_url_path(url.path()).map_err(object_store::Error::from)?;
                Ok((Box::new(s3), prefix))
            }
            _ => {
                let (store, path) = parse_url(&url)?;
                Ok((store, path.child(config.bucket.as_str())))
            }
        }
    }

    fn object_path(&self, key: &str) -> Path {
        self.root.child(key)
    }

    pub async fn get(
        &self,
        key: &str,
    ) -> Result<BoxStream<'static, Result<Bytes, BlobStoreError>>, BlobStoreError> {
        let started = Instant::now();
        let get_result = self
            .object_store
            .get(&self.object_path(key))
            .await
            .map_err(|e| BlobStoreError::from_object_store(key, e));
        self.metrics.record("get", started);

        let owned_key = key.to_string();
        let stream = get_result?
            .into_stream()
            .map_err(move |e| BlobStoreError::from_object_store(&owned_key, e));
        Ok(stream.boxed())
    }

    pub async fn read_bytes(&self, key: &str) -> Result<Bytes, BlobStoreError> {
        let mut reader = self.get(key).await?;
        let mut bytes = BytesMut::new();
        while let Some(chunk) = reader.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes.into())
    }

    pub async fn exists(&self, key: &str) -> Result<bool, BlobStoreError> {
        match self.object_store.head(&self.object_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(BlobStoreError::from_object_store(key, e)),
        }
    }
}

#[async_trait]
impl BlobStore for BlobStorage {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutResult, BlobStoreError> {
        if bucket != self.bucket {
            return Err(BlobStoreError::BucketNotFound {
                bucket: bucket.to_string(),
            });
        }

        let size_bytes = data.len() as u64;
        let sha256_hash = format!("{:x}", Sha256::digest(&data));
        let path = self.object_path(key);

        let started = Instant::now();
        let result = self
            .object_store
            .put(&path, PutPayload::from(data))
            .await
            .map_err(|e| BlobStoreError::from_object_store(key, e));
        self.metrics.record("put_object", started);
        let result = result?;

        debug!(
            "stored object {} ({} bytes, sha256 {})",
            path, size_bytes, sha256_hash
        );
        Ok(PutResult {
            url: path.to_string(),
            size_bytes,
            sha256_hash,
            etag: result.e_tag,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), BlobStoreError> {
        if bucket != self.bucket {
            return Err(BlobStoreError::BucketNotFound {
                bucket: bucket.to_string(),
            });
        }

        let started = Instant::now();
        let result = match self.object_store.delete(&self.object_path(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(BlobStoreError::from_object_store(key, e)),
        };
        self.metrics.record("delete_object", started);
        result
    }
}
