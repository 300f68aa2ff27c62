//! Progress bars for long-running snapshot processing

use indicatif::{ProgressBar, ProgressStyle};

const LINE_TEMPLATE: &str =
    "{msg}\n{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] ~{pos}/{len} lines ({per_sec}, {eta})";

/// A bar sized by the approximate line count, or a hidden bar when quiet.
/// The total is an estimate, so the position may run past it.
pub fn create_line_progress(approx_lines: u64, message: &str, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(approx_lines);
    match ProgressStyle::default_bar().template(LINE_TEMPLATE) {
        Ok(style) => pb.set_style(style.progress_chars("#>-")),
        Err(e) => tracing::debug!(error = %e, "Falling back to default progress style"),
    }
    pb.set_message(message.to_string());
    pb
}
