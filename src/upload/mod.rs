// The upload saga keeps a metadata record and a blob in step. The metadata
// record is written first. If the blob write fails, the record is deleted
// again so that neither store holds anything for the upload's id. A blob that
// lands after its deadline is deleted as well.

use std::{
    fmt,
    future::Future,
    pin::pin,
    sync::Arc,
    time::{Duration, Instant},
};

use blob_store::{BlobStore, BlobStoreError};
use bytes::Bytes;
use derive_builder::Builder;
use opentelemetry::KeyValue;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::{
    data_model::{FileRecord, UploadRequest},
    identity::{IdentityGenerator, TimestampIdentityGenerator},
    metrics::uploads,
    state_store::{MetadataStore, MetadataStoreError},
};

pub mod error;
pub mod workers;

pub use error::StoreError;

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    Start,
    IdentityAssigned,
    MetadataWritten,
    Compensating,
    BlobWritten,
    RolledBack,
    Failed,
}

impl SagaState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaState::BlobWritten | SagaState::RolledBack | SagaState::Failed
        )
    }

    fn can_transition_to(self, next: SagaState) -> bool {
        use SagaState::*;
        matches!(
            (self, next),
            (Start, IdentityAssigned) |
                (IdentityAssigned, MetadataWritten) |
                (IdentityAssigned, Failed) |
                (MetadataWritten, BlobWritten) |
                (MetadataWritten, Compensating) |
                (Compensating, RolledBack)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SagaState::Start => "start",
            SagaState::IdentityAssigned => "identity_assigned",
            SagaState::MetadataWritten => "metadata_written",
            SagaState::Compensating => "compensating",
            SagaState::BlobWritten => "blob_written",
            SagaState::RolledBack => "rolled_back",
            SagaState::Failed => "failed",
        }
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one upload. `id` is only set when both writes committed.
#[derive(Debug)]
pub struct UploadResult {
    pub ok: bool,
    pub id: Option<String>,
    pub error: Option<StoreError>,
    pub state: SagaState,
}

impl UploadResult {
    fn committed(id: String) -> Self {
        Self {
            ok: true,
            id: Some(id),
            error: None,
            state: SagaState::BlobWritten,
        }
    }

    fn failed(error: StoreError, state: SagaState) -> Self {
        Self {
            ok: false,
            id: None,
            error: Some(error),
            state,
        }
    }

    pub fn into_result(self) -> Result<String, StoreError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.id.unwrap_or_default()),
        }
    }
}

#[derive(Debug, Clone)]
enum CompensationAction {
    DeleteMetadataRecord { id: String },
    DeleteBlob { bucket: String, key: String },
}

/// Per-upload bookkeeping: the current state and the steps that have to be
/// undone if a later step fails.
struct UploadSaga {
    id: String,
    state: SagaState,
    compensation_actions: Vec<CompensationAction>,
}

impl UploadSaga {
    fn new(id: String) -> Self {
        Self {
            id,
            state: SagaState::Start,
            compensation_actions: Vec::new(),
        }
    }

    fn transition(&mut self, next: SagaState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid saga transition {} -> {}",
            self.state,
            next
        );
        debug!(upload_id = %self.id, from = %self.state, to = %next, "saga transition");
        self.state = next;
    }

    fn commit(&mut self) {
        self.compensation_actions.clear();
        self.transition(SagaState::BlobWritten);
    }
}

/// How a store call finished relative to the call deadline.
enum Settled<T, E> {
    InTime(Result<T, E>),
    /// The deadline passed, and the call was awaited until it finished
    /// anyway. `outcome` says whether the write landed.
    Late { elapsed: Duration, outcome: Result<T, E> },
}

fn default_identity_generator() -> Arc<dyn IdentityGenerator> {
    Arc::new(TimestampIdentityGenerator)
}

#[derive(Builder)]
pub struct UploadOrchestrator {
    metadata_store: Arc<dyn MetadataStore>,
    blob_store: Arc<dyn BlobStore>,
    #[builder(default = "default_identity_generator()")]
    identity_generator: Arc<dyn IdentityGenerator>,
    #[builder(setter(into))]
    bucket: String,
    #[builder(default = "DEFAULT_CALL_TIMEOUT")]
    call_timeout: Duration,
    #[builder(default)]
    metrics: Arc<uploads::Metrics>,
}

impl UploadOrchestrator {
    /// Writes the metadata record, then the blob, compensating the record if
    /// the blob write fails. Always returns in a terminal state.
    ///
    /// A store call that overruns `call_timeout` fails the upload with a
    /// timeout error, but it is never abandoned: the orchestrator waits for it
    /// to finish and undoes whatever it wrote before returning.
    #[tracing::instrument(
        skip_all,
        fields(file_name = %request.file_name, size = request.size, upload_id = tracing::field::Empty)
    )]
    pub async fn upload(&self, request: UploadRequest) -> UploadResult {
        let started = Instant::now();
        let id = self.identity_generator.generate(&request.file_name);
        tracing::Span::current().record("upload_id", id.as_str());

        let mut saga = UploadSaga::new(id);
        saga.transition(SagaState::IdentityAssigned);

        let record = FileRecord::from_request(&saga.id, &request);
        let result = match self.write_metadata(&mut saga, &record).await {
            Err(err) => {
                // A late put that landed still has to be undone.
                if saga.state == SagaState::MetadataWritten {
                    self.compensate(&mut saga).await;
                } else {
                    saga.transition(SagaState::Failed);
                }
                UploadResult::failed(err.into(), saga.state)
            }
            Ok(()) => match self.write_blob(&mut saga, request.bytes).await {
                Ok(size_bytes) => {
                    saga.commit();
                    self.metrics.uploaded_bytes.add(size_bytes, &[]);
                    info!(upload_id = %saga.id, size_bytes, "upload committed");
                    UploadResult::committed(saga.id.clone())
                }
                Err(err) => {
                    self.compensate(&mut saga).await;
                    UploadResult::failed(err.into(), saga.state)
                }
            },
        };
        debug_assert!(result.state.is_terminal());

        let timed_out = result.error.as_ref().is_some_and(StoreError::is_timeout);
        let labels = [
            KeyValue::new("outcome", result.state.as_str()),
            KeyValue::new("timeout", timed_out),
        ];
        self.metrics.outcomes.add(1, &labels);
        self.metrics
            .duration
            .record(started.elapsed().as_secs_f64(), &labels);
        result
    }

    async fn write_metadata(
        &self,
        saga: &mut UploadSaga,
        record: &FileRecord,
    ) -> Result<(), MetadataStoreError> {
        let (landed, result) = match self.settle(self.metadata_store.put(record)).await {
            Settled::InTime(result) => (result.is_ok(), result),
            Settled::Late { elapsed, outcome } => {
                (outcome.is_ok(), Err(MetadataStoreError::Timeout { elapsed }))
            }
        };
        if landed {
            saga.compensation_actions
                .push(CompensationAction::DeleteMetadataRecord {
                    id: saga.id.clone(),
                });
            saga.transition(SagaState::MetadataWritten);
        }
        result.inspect_err(|err| {
            error!(upload_id = %saga.id, "failed to write metadata record: {err}")
        })
    }

    async fn write_blob(&self, saga: &mut UploadSaga, data: Bytes) -> Result<u64, BlobStoreError> {
        let put_result = match self
            .settle(self.blob_store.put_object(&self.bucket, &saga.id, data))
            .await
        {
            Settled::InTime(result) => result,
            Settled::Late { elapsed, outcome } => {
                if outcome.is_ok() {
                    saga.compensation_actions.push(CompensationAction::DeleteBlob {
                        bucket: self.bucket.clone(),
                        key: saga.id.clone(),
                    });
                }
                Err(BlobStoreError::Timeout { elapsed })
            }
        }
        .inspect_err(|err| error!(upload_id = %saga.id, "failed to write blob: {err}"))?;
        debug!(
            upload_id = %saga.id,
            url = %put_result.url,
            sha256 = %put_result.sha256_hash,
            etag = put_result.etag.as_deref().unwrap_or("-"),
            "blob written"
        );
        Ok(put_result.size_bytes)
    }

    /// Runs the recorded compensation actions in reverse. Failures are logged
    /// and counted, never returned.
    async fn compensate(&self, saga: &mut UploadSaga) {
        saga.transition(SagaState::Compensating);
        warn!(
            upload_id = %saga.id,
            "running {} compensation action(s)",
            saga.compensation_actions.len()
        );
        for action in saga.compensation_actions.drain(..).rev() {
            match action {
                CompensationAction::DeleteBlob { bucket, key } => {
                    self.rollback_blob(&bucket, &key).await
                }
                CompensationAction::DeleteMetadataRecord { id } => {
                    self.rollback_metadata_record(&id).await
                }
            }
        }
        saga.transition(SagaState::RolledBack);
    }

    async fn rollback_metadata_record(&self, id: &str) {
        match self.settle(self.metadata_store.delete(id)).await.into_outcome() {
            Ok(()) => info!(upload_id = %id, "rolled back metadata record"),
            Err(err) => {
                self.metrics.compensation_failures.add(1, &[]);
                error!(
                    upload_id = %id,
                    "failed to roll back metadata record, record is orphaned: {err}"
                );
            }
        }
    }

    async fn rollback_blob(&self, bucket: &str, key: &str) {
        match self
            .settle(self.blob_store.delete_object(bucket, key))
            .await
            .into_outcome()
        {
            Ok(()) => info!(upload_id = %key, "removed blob written after the deadline"),
            Err(err) => {
                self.metrics.compensation_failures.add(1, &[]);
                error!(upload_id = %key, "failed to remove blob, blob is orphaned: {err}");
            }
        }
    }

    /// Awaits `call` to completion. Overrunning `call_timeout` is reported
    /// as [`Settled::Late`], but the call keeps being polled until it
    /// finishes.
    async fn settle<T, E>(&self, call: impl Future<Output = Result<T, E>>) -> Settled<T, E> {
        let mut call = pin!(call);
        match time::timeout(self.call_timeout, call.as_mut()).await {
            Ok(result) => Settled::InTime(result),
            Err(_) => {
                warn!(
                    "store call exceeded {:?}, waiting for it to finish",
                    self.call_timeout
                );
                Settled::Late {
                    elapsed: self.call_timeout,
                    outcome: call.await,
                }
            }
        }
    }
}

impl<T, E> Settled<T, E> {
    fn into_outcome(self) -> Result<T, E> {
        match self {
            Settled::InTime(result) => result,
            Settled::Late { outcome, .. } => outcome,
        }
    }
}
