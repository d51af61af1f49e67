use crate::lifecycle::LifecycleState;
use crate::poll::PollError;
use crate::reader::ReaderError;
use crate::registry::RegistryError;
use stream_emulator::BackendError;

/// Top-level error of the harness.
///
/// Every layer has its own error type; they all convert into this one so
/// that harness operations can use `?` throughout.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Polling failed: {0}")]
    Poll(#[from] PollError<BackendError>),
    #[error("Shard registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Shard reader error: {0}")]
    Reader(#[from] ReaderError),
    #[error("{failed} of {total} records failed to load (first error: {first_error})")]
    PartialLoad {
        failed: usize,
        total: usize,
        first_error: String,
    },
    #[error("Cannot {operation} while the stream is {state}; delete it first")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
    #[error("The harness targets a live service; there is no emulator to close")]
    NotEmulated,
    #[error("Failed to start the shared emulator: {0}")]
    EmulatorStart(#[from] std::io::Error),
    /// The case body failed. `cleanup` holds the error of the delete that
    /// followed it, if that failed too.
    #[error("Case '{name}' failed: {message}")]
    CaseFailed {
        name: String,
        message: String,
        #[source]
        cleanup: Option<Box<HarnessError>>,
    },
    #[error("Configuration error: {0}")]
    Config(String),
}
