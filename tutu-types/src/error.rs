//! Error types for each seam of the daemon.

use thiserror::Error;

/// Persistence errors from the blob, manifest, and metadata stores.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A written blob's digest did not match the expected digest.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest the caller expected.
        expected: String,
        /// The digest actually computed.
        actual: String,
    },

    /// A written blob's size did not match the expected size.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        /// The size the caller expected.
        expected: u64,
        /// The size actually written.
        actual: u64,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Model registry errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The model is not present locally.
    #[error("model not found: {0}")]
    NotFound(String),

    /// The model's manifest references a blob that is missing or whose
    /// contents do not hash to its digest.
    #[error("model corrupted: {0}")]
    Corrupted(String),

    /// A pull was requested for a name the catalog does not know.
    #[error("unknown model {name}; known models: {known}")]
    UnknownModel {
        /// The requested name.
        name: String,
        /// Comma-separated list of catalogued names.
        known: String,
    },

    /// The download failed outright (bad status, unusable response).
    #[error("download failed: {0}")]
    Download(String),

    /// The download was interrupted mid-stream. The partial file is kept;
    /// pulling again resumes from it.
    #[error("download interrupted: {0}; run pull again to resume")]
    Interrupted(String),

    /// A store operation failed beneath the registry.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Inference backend errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackendError {
    /// The child process never became ready.
    #[error("llama-server failed to start: {message}{stderr_tail}")]
    LoadFailed {
        /// Human-readable cause.
        message: String,
        /// Tail of the child's captured stderr, prefixed with a newline
        /// when non-empty.
        stderr_tail: String,
    },

    /// HTTP transport to the backend failed. A dead child surfaces here on
    /// the next request.
    #[error("backend transport error: {0}")]
    Transport(String),

    /// The backend did not respond within the configured deadline.
    #[error("inference timed out")]
    Timeout,

    /// The backend responded with data the proxy could not interpret.
    #[error("backend protocol error: {0}")]
    Protocol(String),

    /// The handle was already closed.
    #[error("backend closed")]
    Closed,

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl BackendError {
    /// Build a [`BackendError::LoadFailed`] from a message and the captured
    /// stderr tail (last lines of the child's output).
    pub fn load_failed(message: impl Into<String>, stderr_tail: &str) -> Self {
        let tail = stderr_tail.trim();
        BackendError::LoadFailed {
            message: message.into(),
            stderr_tail: if tail.is_empty() {
                String::new()
            } else {
                format!("\n{tail}")
            },
        }
    }
}

/// Engine pool errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum PoolError {
    /// The model cannot fit in the memory budget and nothing is evictable.
    #[error("model needs {needed} bytes but only {budget} are budgeted and nothing is evictable")]
    Exhausted {
        /// Bytes the model would occupy.
        needed: u64,
        /// Configured pool budget in bytes.
        budget: u64,
    },

    /// Resolving the model name to a local path failed.
    #[error("{0}")]
    Resolve(#[from] RegistryError),

    /// Loading the backend failed.
    #[error("{0}")]
    Load(#[from] BackendError),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
