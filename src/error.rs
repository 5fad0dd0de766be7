//! Error types for album synchronization.

use thiserror::Error;

use crate::model::PinKey;

/// Boxed cause of a transport failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of the persistent store behind the cache
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode or decode store file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Pin {0} is not in the store")]
    UnknownPin(PinKey),

    #[error("Store lock was poisoned")]
    Poisoned,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

/// Everything that can abort a search, an image fetch or an album operation
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failure, timeout or non-success status
    #[error("Network error ({context}): {source}")]
    Network {
        context: String,
        #[source]
        source: BoxError,
    },

    /// Response body did not match the expected schema
    #[error("Failed to decode response: {0}")]
    Decode(#[source] serde_json::Error),

    /// The service answered with a well-formed error envelope
    #[error("Photo service error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Another load or refresh is already running for this pin
    #[error("An album operation is already in flight for pin {0}")]
    Busy(PinKey),

    /// The operation was abandoned through `cancel`
    #[error("Album operation for pin {0} was cancelled")]
    Cancelled(PinKey),
}

impl SyncError {
    pub fn network(context: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Network {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Errors that come from talking to the remote service
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Decode(_) | Self::Api { .. }
        )
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_error_keeps_cause() {
        let cause = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        let err = SyncError::network("GET https://example.com", cause);

        assert!(err.is_remote());
        assert!(err.to_string().contains("timed out"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_storage_error_converts() {
        let err: SyncError = StoreError::Poisoned.into();
        assert!(matches!(err, SyncError::Storage(StoreError::Poisoned)));
        assert!(!err.is_remote());
    }
}
