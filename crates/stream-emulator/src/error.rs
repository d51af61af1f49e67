//! # Backend Errors
//!
//! The error type every [`StreamBackend`](crate::StreamBackend) returns. The
//! variants mirror the Kinesis exception classes the lifecycle code has to
//! tell apart; anything else ends up in [`BackendError::Service`].

/// Errors returned by a stream backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// `ResourceNotFoundException`
    #[error("Stream not found: {0}")]
    NotFound(String),
    /// `ResourceInUseException`
    #[error("Stream in use: {0}")]
    InUse(String),
    /// `InvalidArgumentException` / `ValidationException`
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// `ExpiredIteratorException`
    #[error("Shard iterator expired: {0}")]
    ExpiredIterator(String),
    #[error("Emulator closed")]
    EmulatorClosed,
    #[error("Emulator dropped response channel")]
    EmulatorDropped,
    #[error("Service error ({code}): {message}")]
    Service { code: String, message: String },
}

impl BackendError {
    /// Whether the backend reported the stream as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound(_))
    }

    /// Classify a service error code, as returned by the AWS SDK's
    /// `ProvideErrorMetadata::code()`.
    pub fn from_code(code: Option<&str>, message: Option<&str>) -> Self {
        let message = message.unwrap_or("Unknown error").to_string();
        match code {
            Some("ResourceNotFoundException") => BackendError::NotFound(message),
            Some("ResourceInUseException") => BackendError::InUse(message),
            Some("InvalidArgumentException") | Some("ValidationException") => {
                BackendError::InvalidArgument(message)
            }
            Some("ExpiredIteratorException") => BackendError::ExpiredIterator(message),
            other => BackendError::Service {
                code: other.unwrap_or("Unknown").to_string(),
                message,
            },
        }
    }
}
