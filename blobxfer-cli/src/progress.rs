//! Terminal progress bars fed by transfer progress callbacks.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};

use blobxfer::transfer::ProgressCallback;
use blobxfer::TransferProgress;

const BAR_TEMPLATE: &str =
    "[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

/// A byte-count progress bar.
pub fn transfer_bar(total_bytes: u64) -> ProgressBar {
    let bar = ProgressBar::new(total_bytes);
    bar.set_style(
        ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

/// Callback that moves `bar` to the reported byte count.
pub fn bar_callback(bar: &ProgressBar) -> ProgressCallback {
    let bar = bar.clone();
    Arc::new(move |progress: TransferProgress| {
        bar.set_length(progress.total_bytes);
        bar.set_position(progress.bytes_transferred);
    })
}

/// Human-readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    indicatif::HumanBytes(bytes).to_string()
}
