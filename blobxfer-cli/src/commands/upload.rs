//! Upload command - send a local file as a block blob.

use std::path::PathBuf;
use std::time::Instant;

use blobxfer::BlobError;

use crate::error::CliError;
use crate::progress::{bar_callback, format_bytes, transfer_bar};
use crate::runner::CliRunner;

/// Arguments for the upload command.
pub struct UploadArgs {
    pub file: PathBuf,
    pub container: String,
    pub blob: String,
}

/// Run the upload command.
pub fn run(runner: &CliRunner, args: UploadArgs) -> Result<(), CliError> {
    let size = std::fs::metadata(&args.file)
        .map_err(|e| BlobError::io(&args.file, e))?
        .len();

    let bar = transfer_bar(size);
    let service = runner.service(Some(bar_callback(&bar)))?;
    let client = service
        .container_client(&args.container)
        .block_blob_client(&args.blob);

    println!(
        "Uploading {} ({}) to {}/{}",
        args.file.display(),
        format_bytes(size),
        args.container,
        args.blob
    );

    let started = Instant::now();
    let result = runner.block_on(client.upload_file(&args.file, runner.cancel_token()));
    match result {
        Ok(response) => {
            bar.finish();
            println!(
                "Uploaded {} in {:.1}s (etag {})",
                format_bytes(size),
                started.elapsed().as_secs_f64(),
                response.etag.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        Err(e) => {
            bar.abandon();
            Err(e.into())
        }
    }
}
