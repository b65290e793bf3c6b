use std::{env, net::SocketAddr, path::Path, time::Duration};

use anyhow::{anyhow, Result};
use blob_store::BlobStorageConfig;
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::state_store::MetadataStoreConfig;

const LOCAL_ENV: &str = "local";
const ENV_PREFIX: &str = "FILEVAULT_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub env: String,
    pub instance_id: Option<String>,
    pub listen_addr: String,
    pub structured_logging: bool,
    pub metadata_store: MetadataStoreConfig,
    pub blob_storage: BlobStorageConfig,
    pub upload: UploadConfig,
    pub telemetry: TelemetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            env: LOCAL_ENV.to_string(),
            instance_id: None,
            listen_addr: "0.0.0.0:8900".to_string(),
            structured_logging: false,
            metadata_store: Default::default(),
            blob_storage: Default::default(),
            upload: Default::default(),
            telemetry: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_concurrent_uploads: usize,
    /// Deadline applied to every metadata and blob store call.
    pub call_timeout_ms: u64,
    pub max_upload_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            max_concurrent_uploads: 64,
            call_timeout_ms: 30_000,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

impl UploadConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub enable_metrics: bool,
    pub enable_tracing: bool,
    // OTLP collector endpoint. The exporter default is used when unset.
    pub endpoint: Option<String>,
    pub metrics_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        TelemetryConfig {
            enable_metrics: false,
            enable_tracing: false,
            endpoint: None,
            metrics_interval_secs: 10,
        }
    }
}

impl TelemetryConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }
}

impl ServerConfig {
    /// Defaults, then the YAML file when given, then `FILEVAULT_` environment
    /// variables. Nested keys use `__`, e.g. `FILEVAULT_UPLOAD__CALL_TIMEOUT_MS`.
    pub fn load(path: Option<&Path>) -> Result<ServerConfig> {
        let mut figment = Figment::from(Serialized::defaults(ServerConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(anyhow!("config file not found: {}", path.display()));
            }
            figment = figment.merge(Yaml::file(path));
        }
        let config: ServerConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow!("invalid listen address: {}", self.listen_addr));
        }
        if self.metadata_store.table.is_empty() {
            return Err(anyhow!("metadata_store.table cannot be empty"));
        }
        if self.blob_storage.bucket.is_empty() {
            return Err(anyhow!("blob_storage.bucket cannot be empty"));
        }
        if self.upload.max_concurrent_uploads == 0 {
            return Err(anyhow!("upload.max_concurrent_uploads must be at least 1"));
        }
        if self.upload.call_timeout_ms == 0 {
            return Err(anyhow!("upload.call_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn instance_id(&self) -> String {
        self.instance_id.clone().unwrap_or_else(|| {
            let host = env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
            format!("{}-{}", self.env, host)
        })
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8900");
        assert_eq!(config.metadata_store.table, "files");
        assert_eq!(config.blob_storage.bucket, "files");
        assert_eq!(config.upload.call_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_yaml_then_env_override() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
env: prod
listen_addr: 127.0.0.1:9000
metadata_store:
  path: /var/lib/filevault/metadata
  table: uploads
blob_storage:
  path: s3://media-bucket/uploads
  bucket: media-bucket
  region: eu-west-1
upload:
  max_concurrent_uploads: 8
"#,
            )?;
            jail.set_env("FILEVAULT_UPLOAD__CALL_TIMEOUT_MS", "1500");
            jail.set_env("FILEVAULT_STRUCTURED_LOGGING", "true");

            let config = ServerConfig::load(Some(Path::new("config.yaml")))
                .map_err(|e| e.to_string())?;

            assert_eq!(config.env, "prod");
            assert_eq!(config.listen_addr, "127.0.0.1:9000");
            assert_eq!(config.metadata_store.table, "uploads");
            assert!(config.metadata_store.create_table_if_missing);
            assert_eq!(config.blob_storage.bucket, "media-bucket");
            assert_eq!(config.blob_storage.region.as_deref(), Some("eu-west-1"));
            assert_eq!(config.upload.max_concurrent_uploads, 8);
            assert_eq!(config.upload.call_timeout_ms, 1500);
            assert_eq!(config.upload.max_upload_bytes, 100 * 1024 * 1024);
            assert!(config.structured_logging);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bad_addr.yaml", "listen_addr: not-an-address")?;
            jail.create_file("no_workers.yaml", "upload:\n  max_concurrent_uploads: 0")?;
            jail.create_file("no_bucket.yaml", "blob_storage:\n  bucket: \"\"")?;

            for file in ["bad_addr.yaml", "no_workers.yaml", "no_bucket.yaml"] {
                assert!(
                    ServerConfig::load(Some(Path::new(file))).is_err(),
                    "{file} should be rejected"
                );
            }
            assert!(ServerConfig::load(Some(Path::new("missing.yaml"))).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_instance_id_falls_back_to_env() {
        let config = ServerConfig {
            env: "staging".to_string(),
            ..Default::default()
        };
        assert!(config.instance_id().starts_with("staging-"));

        let config = ServerConfig {
            instance_id: Some("node-1".to_string()),
            ..Default::default()
        };
        assert_eq!(config.instance_id(), "node-1");
    }
}
