//! blobxfer - resilient transfers for cloud blob storage
//!
//! The crate is built around two engines:
//!
//! - [`retry::RetryOrchestrator`] runs every logical request as a series of
//!   attempts with exponential or fixed backoff, per-attempt timeouts and
//!   failover of reads to a geo-replicated secondary endpoint.
//! - [`transfer::ChunkedTransferCoordinator`] splits large uploads and
//!   downloads into chunks and runs them with bounded concurrency, cancelling
//!   the rest of a transfer as soon as one chunk fails.
//!
//! Requests flow through a small [`pipeline`] of policies (request IDs,
//! signing, logging) into an [`pipeline::HttpTransport`], which is reqwest in
//! production and an in-memory fake in tests.
//!
//! ```no_run
//! use blobxfer::{BlobServiceClient, ClientConfig, Credential, SharedKeyCredential};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> blobxfer::BlobResult<()> {
//! let key = SharedKeyCredential::new("acct", "c2VjcmV0LWtleS1ieXRlcw==")?;
//! let config = ClientConfig::new("https://acct.blob.core.windows.net")?
//!     .with_credential(Credential::SharedKey(key));
//! let service = BlobServiceClient::new(config)?;
//!
//! let blob = service.container_client("photos").block_blob_client("cat.png");
//! let cancel = CancellationToken::new();
//! blob.upload_file("cat.png".as_ref(), &cancel).await?;
//! let bytes = blob.blob_client().download_to_buffer(&cancel).await?;
//! # let _ = bytes;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod poller;
pub mod retry;
pub mod sas;
pub mod transfer;

pub use client::{
    BlobClient, BlobProperties, BlobServiceClient, BlockBlobClient, ContainerClient, CopyOutcome,
    CopyPollOperation, CopyStatus, UploadResponse,
};
pub use config::{ClientConfig, ConfigFile};
pub use credential::{Credential, SharedKeyCredential, TokenCredential};
pub use error::{BlobError, BlobResult, RequestError};
pub use logging::{init_logging, LogConfig, LogLevel, LoggingGuard};
pub use poller::{PollState, Poller};
pub use retry::{RetryOrchestrator, RetryPolicyConfig, RetryPolicyKind};
pub use sas::{BlobSasBuilder, BlobSasPermissions, SasProtocol};
pub use transfer::{ChunkedTransferCoordinator, TransferOptions, TransferProgress};

/// Crate version, sent in the `User-Agent` header.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
