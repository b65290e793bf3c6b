use std::{error::Error as StdError, io, time::Duration};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BlobStoreError {
    #[error("bucket not found: {bucket}")]
    BucketNotFound { bucket: String },

    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("permission denied for object {key}. error: {source}")]
    PermissionDenied {
        key: String,
        source: object_store::Error,
    },

    #[error("storage quota exceeded while writing {key}. error: {source}")]
    QuotaExceeded {
        key: String,
        source: object_store::Error,
    },

    #[error("blob store call timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("invalid blob storage configuration: {message}")]
    InvalidConfig { message: String },

    #[error(transparent)]
    Unavailable {
        #[from]
        source: object_store::Error,
    },
}

impl BlobStoreError {
    /// Classifies an `object_store` failure for the object stored under
    /// `key`.
    pub fn from_object_store(key: &str, err: object_store::Error) -> Self {
        if matches!(err, object_store::Error::NotFound { .. }) {
            return Self::NotFound {
                key: key.to_string(),
            };
        }
        if matches!(
            err,
            object_store::Error::PermissionDenied { .. } |
                object_store::Error::Unauthenticated { .. }
        ) {
            return Self::PermissionDenied {
                key: key.to_string(),
                source: err,
            };
        }
        if is_storage_full(&err) {
            return Self::QuotaExceeded {
                key: key.to_string(),
                source: err,
            };
        }
        Self::Unavailable { source: err }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn is_storage_full(err: &object_store::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded
            ) {
                return true;
            }
        }
        source = current.source();
    }
    false
}
