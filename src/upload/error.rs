use blob_store::BlobStoreError;

use crate::state_store::MetadataStoreError;

/// Failure to assign an id to an upload.
///
/// The timestamp generator cannot fail, so nothing produces this today. It
/// exists for generators backed by a remote sequence.
#[derive(Debug, thiserror::Error)]
#[error("failed to generate upload id: {message}")]
#[allow(dead_code)]
pub struct IdentityError {
    pub message: String,
}

/// Why an upload did not commit, tagged by the store that failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error(transparent)]
    #[allow(dead_code)]
    Identity(#[from] IdentityError),

    #[error("metadata write failed: {0}")]
    Metadata(#[from] MetadataStoreError),

    #[error("blob write failed: {0}")]
    Blob(#[from] BlobStoreError),
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            StoreError::Metadata(MetadataStoreError::Timeout { .. }) |
                StoreError::Blob(BlobStoreError::Timeout { .. })
        )
    }
}
