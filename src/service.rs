use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::Router;
use axum_server::Handle;
use blob_store::{BlobStorage, BlobStore};
use tokio::signal;
use tracing::{error, info};

use crate::{
    config::ServerConfig,
    metrics::{init_provider, uploads},
    routes::{create_routes, RouteState},
    state_store::{rocksdb::RocksDBMetadataStore, MetadataStore},
    upload::{workers::UploadWorkers, UploadOrchestrator, UploadOrchestratorBuilder},
};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct Service {
    pub config: ServerConfig,
    pub blob_storage: Arc<BlobStorage>,
    pub metadata_store: Arc<dyn MetadataStore>,
    pub orchestrator: Arc<UploadOrchestrator>,
    pub workers: UploadWorkers,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let blob_storage = Arc::new(
            BlobStorage::new(config.blob_storage.clone())
                .context("error initializing BlobStorage")?,
        );
        let metadata_store: Arc<dyn MetadataStore> = Arc::new(
            RocksDBMetadataStore::open(&config.metadata_store)
                .context("error initializing metadata store")?,
        );

        let orchestrator = Arc::new(
            UploadOrchestratorBuilder::default()
                .metadata_store(metadata_store.clone())
                .blob_store(blob_storage.clone())
                .bucket(blob_storage.bucket())
                .call_timeout(config.upload.call_timeout())
                .metrics(Arc::new(uploads::Metrics::new()))
                .build()
                .context("error building upload orchestrator")?,
        );
        let workers = UploadWorkers::new(orchestrator.clone(), config.upload.max_concurrent_uploads);

        Ok(Self {
            config,
            blob_storage,
            metadata_store,
            orchestrator,
            workers,
        })
    }

    pub fn router(&self) -> Router {
        let route_state = RouteState {
            workers: self.workers.clone(),
            blob_storage: self.blob_storage.clone(),
            metadata_store: self.metadata_store.clone(),
        };
        create_routes(route_state, self.config.upload.max_upload_bytes)
    }

    pub async fn start(&self) -> Result<()> {
        let instance_id = self.config.instance_id();
        let meter_provider = init_provider(
            self.config.telemetry.enable_metrics,
            self.config.telemetry.endpoint.as_ref(),
            self.config.telemetry.metrics_interval(),
            Some(&instance_id),
            env!("CARGO_PKG_VERSION"),
        )?;

        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let served = axum_server::bind(addr)
            .handle(handle)
            .serve(self.router().into_make_service())
            .await;

        // Uploads run on their own tasks and can outlive their connections.
        self.workers.drain().await;
        served?;

        if let Some(meter_provider) = meter_provider {
            if let Err(err) = meter_provider.shutdown() {
                error!("error shutting down meter provider: {:?}", err);
            }
        }
        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("failed to install SIGTERM handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    // Open connections get the grace period. Running uploads are drained
    // after the server stops.
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
    info!("signal received, shutting down server gracefully");
}
