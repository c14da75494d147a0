//! Download command - fetch a blob into a local file.

use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::{Stream, StreamExt};
use indicatif::ProgressBar;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use blobxfer::{BlobClient, BlobError, BlobResult};

use crate::error::CliError;
use crate::progress::{bar_callback, format_bytes, transfer_bar};
use crate::runner::CliRunner;

/// Arguments for the download command.
pub struct DownloadArgs {
    pub container: String,
    pub blob: String,
    pub dest: PathBuf,
    pub stream: bool,
}

/// Run the download command.
pub fn run(runner: &CliRunner, args: DownloadArgs) -> Result<(), CliError> {
    let bar = transfer_bar(0);
    let service = runner.service(Some(bar_callback(&bar)))?;
    let client = service
        .container_client(&args.container)
        .blob_client(&args.blob);

    println!(
        "Downloading {}/{} to {}{}",
        args.container,
        args.blob,
        args.dest.display(),
        if args.stream { " (single stream)" } else { "" }
    );

    let started = Instant::now();
    let cancel = runner.cancel_token();
    let result = if args.stream {
        runner.block_on(stream_to_file(&client, &args.dest, &bar, cancel))
    } else {
        runner.block_on(client.download_to_file(&args.dest, cancel))
    };

    match result {
        Ok(size) => {
            bar.finish();
            println!(
                "Downloaded {} in {:.1}s",
                format_bytes(size),
                started.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            bar.abandon();
            Err(e.into())
        }
    }
}

/// Writes a resumable stream to `dest` in arrival order.
async fn stream_to_file(
    client: &BlobClient,
    dest: &Path,
    bar: &ProgressBar,
    cancel: &CancellationToken,
) -> BlobResult<u64> {
    let stream = client.download_stream(cancel).await?;
    bar.set_length(stream.end());
    write_chunks(stream.into_stream(), dest, bar).await
}

/// Writes `chunks` to a new file at `dest`. The file is removed again if
/// the stream fails or is cancelled part way.
async fn write_chunks<S, B>(mut chunks: S, dest: &Path, bar: &ProgressBar) -> BlobResult<u64>
where
    S: Stream<Item = BlobResult<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| BlobError::io(dest, e))?;

    let mut written = 0u64;
    let result = async {
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let chunk = chunk.as_ref();
            file.write_all(chunk)
                .await
                .map_err(|e| BlobError::io(dest, e))?;
            written += chunk.len() as u64;
            bar.set_position(written);
        }
        file.flush().await.map_err(|e| BlobError::io(dest, e))?;
        Ok::<_, BlobError>(())
    }
    .await;

    if let Err(e) = result {
        drop(file);
        if let Err(remove) = tokio::fs::remove_file(dest).await {
            tracing::warn!(path = %dest.display(), error = %remove, "Failed to remove partial download");
        }
        return Err(e);
    }
    Ok(written)
}
