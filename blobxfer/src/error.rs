//! Error types for blob operations.
//!
//! Two layers of errors exist:
//!
//! - [`RequestError`] describes why a single HTTP attempt failed. The retry
//!   orchestrator classifies these to decide whether another attempt is made.
//! - [`BlobError`] is what callers see once a logical operation has finished
//!   failing: retries exhausted, a non-retryable status, a failed chunk, or
//!   cancellation.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for blob operations.
pub type BlobResult<T> = Result<T, BlobError>;

/// Failure of a single request attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// Connection reset, DNS failure, broken body stream and similar.
    #[error("network error: {0}")]
    Network(String),

    /// The attempt did not complete within its time budget.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with a non-success status.
    #[error("HTTP {status} from {host}{}", .code.as_deref().map(|c| format!(" ({})", c)).unwrap_or_default())]
    Status {
        status: u16,
        /// Value of the `x-ms-error-code` header, when present.
        code: Option<String>,
        host: String,
    },

    /// The request could not be signed.
    #[error("failed to sign request: {0}")]
    Signing(String),

    /// The request could not be built (bad header value, unusable URL).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The caller cancelled the operation.
    #[error("request cancelled")]
    Cancelled,
}

impl RequestError {
    /// Builds a status error without an error code.
    pub fn status(status: u16, host: impl Into<String>) -> Self {
        Self::Status {
            status,
            code: None,
            host: host.into(),
        }
    }

    /// Returns the HTTP status for `Status` errors.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for failures where the bytes simply stopped arriving.
    ///
    /// Resumable streams restart on these instead of giving up.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Errors surfaced by blob clients and transfers.
#[derive(Debug, Error)]
pub enum BlobError {
    /// A logical request failed, either permanently or after its retry
    /// budget was spent.
    #[error("{operation} failed after {attempts} attempt(s): {source}")]
    Request {
        operation: String,
        attempts: u32,
        #[source]
        source: RequestError,
    },

    /// The caller cancelled the operation.
    #[error("{operation} cancelled")]
    Cancelled { operation: String },

    /// A chunk of a multi-chunk transfer could not complete.
    ///
    /// Sibling chunks are cancelled when this happens, so only the first
    /// observed failure is reported.
    #[error("transfer failed: chunk {index} at offset {offset} could not complete: {source}")]
    ChunkFailed {
        index: usize,
        offset: u64,
        #[source]
        source: Box<BlobError>,
    },

    /// A single-stream download kept ending early.
    #[error(
        "download stream ended at offset {offset} of {end} after {restarts} restart(s)"
    )]
    StreamTruncated { offset: u64, end: u64, restarts: u32 },

    /// Invalid configuration or arguments.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Local file I/O failed.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Credential material is unusable.
    #[error("credential error: {0}")]
    Credential(String),

    /// A server-side copy finished in a failed or aborted state.
    #[error("copy failed: {reason}")]
    CopyFailed { reason: String },

    /// The service returned a response that could not be interpreted.
    #[error("unexpected response for {operation}: {reason}")]
    UnexpectedResponse { operation: String, reason: String },
}

impl BlobError {
    /// Builds a cancellation error for the named operation.
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Builds an I/O error for the given path.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if this failure was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Request { source, .. } => *source == RequestError::Cancelled,
            Self::ChunkFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Number of attempts made by the failed logical request, if known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Request { attempts, .. } => Some(*attempts),
            Self::ChunkFailed { source, .. } => source.attempts(),
            _ => None,
        }
    }

    /// The final per-attempt error, if this failure came from a request.
    pub fn request_error(&self) -> Option<&RequestError> {
        match self {
            Self::Request { source, .. } => Some(source),
            Self::ChunkFailed { source, .. } => source.request_error(),
            _ => None,
        }
    }
}
