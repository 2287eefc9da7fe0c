//! Progress bars for long-running training and batch calls.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle, style::TemplateError};

const TEMPLATE: &str = "[{elapsed_precise}] {msg:<30!} {wide_bar} {pos}/{len}";

/// Creates a styled progress bar with elapsed time, a fixed-width message
/// label and position/total counters.
///
/// When `show` is false the bar still counts but never renders.
///
/// # Errors
///
/// Returns a [`TemplateError`] if the progress bar style template is invalid.
pub(crate) fn progress_bar(
    size: u64,
    msg: impl Into<String>,
    show: bool,
) -> Result<ProgressBar, TemplateError> {
    let pb = ProgressBar::new(size);
    if !show {
        pb.set_draw_target(ProgressDrawTarget::hidden());
        return Ok(pb);
    }

    let style = ProgressStyle::default_bar().template(TEMPLATE)?;
    pb.set_style(style);
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_secs(1));

    Ok(pb)
}
