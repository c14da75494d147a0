//! Shared setup for transfer commands: configuration, logging, the tokio
//! runtime and Ctrl-C handling.

use std::future::Future;

use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use blobxfer::transfer::ProgressCallback;
use blobxfer::{init_logging, BlobServiceClient, ConfigFile, LoggingGuard};

use crate::error::CliError;
use crate::GlobalArgs;

/// Loads the config file and applies command-line overrides.
///
/// An explicit `--config` path must exist; the default path may be absent.
pub fn load_config(args: &GlobalArgs) -> Result<ConfigFile, CliError> {
    let mut config = match &args.config {
        Some(path) => ConfigFile::load(path)?,
        None => match ConfigFile::default_path() {
            Some(path) => ConfigFile::load_or_default(&path)?,
            None => ConfigFile::default(),
        },
    };

    if let Some(concurrency) = args.concurrency {
        config.transfer.concurrency = concurrency;
    }
    if let Some(block_size) = args.block_size {
        if block_size == 0 {
            return Err(CliError::Config("--block-size must be greater than 0".to_string()));
        }
        config.transfer.chunk_size = Some(block_size);
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    Ok(config)
}

/// Everything a transfer command needs to talk to the service.
pub struct CliRunner {
    config: ConfigFile,
    runtime: Runtime,
    cancel: CancellationToken,
    _logging: LoggingGuard,
}

impl CliRunner {
    pub fn new(args: &GlobalArgs) -> Result<Self, CliError> {
        let config = load_config(args)?;
        let logging = init_logging(&config.logging)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(CliError::Runtime)?;

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("Received interrupt, cancelling...");
            on_signal.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

        Ok(Self {
            config,
            runtime,
            cancel,
            _logging: logging,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Token cancelled by Ctrl-C.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            command,
            version = blobxfer::VERSION,
            concurrency = self.config.transfer.effective_concurrency(),
            "blobxfer starting"
        );
        debug!(config = ?self.config, "Effective configuration");
    }

    /// Builds a client, reporting transfer progress to `progress`.
    pub fn service(&self, progress: Option<ProgressCallback>) -> Result<BlobServiceClient, CliError> {
        let mut config = self.config.client_config()?;
        if let Some(progress) = progress {
            config.transfer = config.transfer.with_progress(progress);
        }
        Ok(BlobServiceClient::new(config)?)
    }

    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
