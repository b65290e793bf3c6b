use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, info, Instrument};

use super::{UploadOrchestrator, UploadResult};
use crate::data_model::UploadRequest;

/// Runs uploads off the request handling tasks, at most
/// `max_concurrent_uploads` at a time.
///
/// Each upload runs on its own spawned task, so dropping the future returned
/// by [`UploadWorkers::submit`] (for example when the HTTP client goes away)
/// does not interrupt a saga that has already started.
#[derive(Clone)]
pub struct UploadWorkers {
    orchestrator: Arc<UploadOrchestrator>,
    permits: Arc<Semaphore>,
    capacity: u32,
}

impl UploadWorkers {
    pub fn new(orchestrator: Arc<UploadOrchestrator>, max_concurrent_uploads: usize) -> Self {
        let capacity = u32::try_from(max_concurrent_uploads.min(Semaphore::MAX_PERMITS))
            .unwrap_or(u32::MAX);
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn submit(&self, request: UploadRequest) -> Result<UploadResult> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| anyhow!("upload worker pool is closed"))?;
        debug!(
            "upload of {} admitted, {} permit(s) left",
            request.file_name,
            self.available_permits()
        );

        let orchestrator = self.orchestrator.clone();
        tokio::spawn(
            async move {
                let result = orchestrator.upload(request).await;
                drop(permit);
                result
            }
            .in_current_span(),
        )
        .await
        .context("upload task failed")
    }

    /// Stops admitting uploads and waits until every running upload has
    /// reached a terminal state.
    pub async fn drain(&self) {
        let in_flight = self.capacity as usize - self.available_permits();
        info!("draining upload workers, {in_flight} upload(s) in flight");
        match self.permits.acquire_many(self.capacity).await {
            Ok(_all) => self.permits.close(),
            Err(_) => debug!("upload worker pool already closed"),
        }
        info!("upload workers drained");
    }
}
