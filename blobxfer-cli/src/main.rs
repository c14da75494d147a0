//! blobxfer CLI - Command-line interface
//!
//! Uploads, downloads, server-side copies and SAS generation against a blob
//! storage account configured in `config.ini`.

mod commands;
mod error;
mod progress;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use blobxfer::LogLevel;

use crate::error::CliError;
use crate::runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "blobxfer", version, about = "Parallel, retrying transfers to and from cloud blob storage")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command. Command-line values override the config
/// file.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Path to config.ini (default: <config dir>/blobxfer/config.ini)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Maximum chunks in flight
    #[arg(long, global = true)]
    pub concurrency: Option<usize>,

    /// Chunk size in bytes for block uploads and ranged downloads
    #[arg(long, global = true)]
    pub block_size: Option<u64>,

    /// Log level: error, warn, info, debug or trace
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a local file as a block blob
    Upload {
        /// Local file to upload
        file: PathBuf,
        /// Destination container
        container: String,
        /// Destination blob name
        blob: String,
    },

    /// Download a blob to a local file
    Download {
        /// Source container
        container: String,
        /// Source blob name
        blob: String,
        /// Local destination path
        dest: PathBuf,
        /// Read the blob as one resumable stream instead of parallel ranges
        #[arg(long)]
        stream: bool,
    },

    /// Copy a blob from a URL on the service side
    Copy {
        /// Source blob URL (include a SAS token if the source is private)
        source_url: String,
        /// Destination container
        container: String,
        /// Destination blob name
        blob: String,
        /// Seconds between status polls
        #[arg(long, default_value_t = 2)]
        poll_interval: u64,
    },

    /// Generate a SAS token for a container or blob
    Sas {
        /// Container the token grants access to
        container: String,
        /// Restrict the token to one blob
        blob: Option<String>,
        /// Permissions, any of racwdl
        #[arg(long, default_value = "r")]
        permissions: String,
        /// Hours until the token expires
        #[arg(long, default_value_t = 1)]
        expiry_hours: u32,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Cancelled) => {
            eprintln!("Cancelled.");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let Cli { global, command } = cli;

    match command {
        // SAS generation is offline and needs no runtime or logging.
        Commands::Sas {
            container,
            blob,
            permissions,
            expiry_hours,
        } => {
            let config = runner::load_config(&global)?;
            commands::sas::run(
                &config,
                commands::sas::SasArgs {
                    container,
                    blob,
                    permissions,
                    expiry_hours,
                },
            )
        }
        Commands::Upload {
            file,
            container,
            blob,
        } => {
            let runner = CliRunner::new(&global)?;
            runner.log_startup("upload");
            commands::upload::run(&runner, commands::upload::UploadArgs { file, container, blob })
        }
        Commands::Download {
            container,
            blob,
            dest,
            stream,
        } => {
            let runner = CliRunner::new(&global)?;
            runner.log_startup("download");
            commands::download::run(
                &runner,
                commands::download::DownloadArgs {
                    container,
                    blob,
                    dest,
                    stream,
                },
            )
        }
        Commands::Copy {
            source_url,
            container,
            blob,
            poll_interval,
        } => {
            let runner = CliRunner::new(&global)?;
            runner.log_startup("copy");
            commands::copy::run(
                &runner,
                commands::copy::CopyArgs {
                    source_url,
                    container,
                    blob,
                    poll_interval,
                },
            )
        }
    }
}
