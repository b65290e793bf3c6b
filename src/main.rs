use std::path::PathBuf;

use ::tracing::{error, info, info_span};
use anyhow::Result;
use clap::Parser;
use service::Service;

mod config;
mod data_model;
mod http_objects;
mod identity;
mod metrics;
mod routes;
mod service;
mod state_store;
mod tracing;
mod upload;
use tracing::setup_tracing;

#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "config file", help = "Path to config file")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::ServerConfig::load(cli.config.as_deref())?;

    let tracing_provider = setup_tracing(&config).inspect_err(|e| {
        eprintln!("Error setting up tracing: {:?}", e);
    })?;

    let root_span = info_span!(
        "filevault",
        env = config.env,
        "filevault-instance" = config.instance_id()
    );
    let _guard = root_span.enter();
    info!(
        "starting filevault server, metadata table {}, bucket {}",
        config.metadata_store.table, config.blob_storage.bucket
    );

    let result = match Service::new(config).await {
        Ok(service) => service.start().await,
        Err(err) => Err(err),
    };
    if let Err(err) = &result {
        error!("Error running service: {:?}", err);
    }

    // export traces before shutdown
    if let Some(tracer_provider) = tracing_provider {
        if let Err(err) = tracer_provider.force_flush() {
            error!("Error flushing traces: {:?}", err);
        }
        if let Err(err) = tracer_provider.shutdown() {
            error!("Error shutting down tracer provider: {:?}", err);
        }
    }
    result
}
