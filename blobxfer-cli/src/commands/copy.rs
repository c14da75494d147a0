//! Copy command - start a server-side copy and wait for it.
//!
//! Ctrl-C while waiting aborts the copy on the service.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

use blobxfer::PollState;

use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the copy command.
pub struct CopyArgs {
    pub source_url: String,
    pub container: String,
    pub blob: String,
    pub poll_interval: u64,
}

/// Run the copy command.
pub fn run(runner: &CliRunner, args: CopyArgs) -> Result<(), CliError> {
    let service = runner.service(None)?;
    let client = service
        .container_client(&args.container)
        .blob_client(&args.blob);
    let cancel = runner.cancel_token();
    let interval = Duration::from_secs(args.poll_interval.max(1));

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Copying to {}/{}", args.container, args.blob));

    let result = runner.block_on(async {
        let mut poller = client
            .start_copy_from_url(&args.source_url, cancel)
            .await?
            .with_interval(interval);
        let copy_id = poller.operation().copy_id().to_string();

        loop {
            match poller.poll_once().await? {
                PollState::InProgress {
                    progress: Some(progress),
                } => spinner.set_message(format!("Copy {} in progress: {}", copy_id, progress)),
                state if state.is_terminal() => break,
                _ => {}
            }
            tokio::select! {
                // poll_once notices the cancellation and aborts the copy.
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(interval) => {}
            }
        }
        poller.poll_until_done().await
    });

    match result {
        Ok(outcome) => {
            spinner.finish_and_clear();
            println!(
                "Copy {} complete{}",
                outcome.copy_id,
                outcome
                    .progress
                    .map(|p| format!(" ({} bytes)", p))
                    .unwrap_or_default()
            );
            Ok(())
        }
        Err(e) => {
            spinner.abandon();
            Err(e.into())
        }
    }
}
