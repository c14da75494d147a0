//! CLI error type.

use thiserror::Error;

use blobxfer::BlobError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error(transparent)]
    Blob(BlobError),

    #[error("cancelled")]
    Cancelled,
}

impl From<BlobError> for CliError {
    fn from(error: BlobError) -> Self {
        match error {
            BlobError::InvalidConfig(message) => Self::Config(message),
            e if e.is_cancelled() => Self::Cancelled,
            e => Self::Blob(e),
        }
    }
}
