use std::error::Error;
use thiserror::Error;

/// Result alias for persistence operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by persistence backends regardless of the underlying store.
///
/// Unlike telemetry noise, persistence failures propagate to the caller of
/// the operation that needed them.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
