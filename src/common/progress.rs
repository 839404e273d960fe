use indicatif::{ProgressBar, ProgressStyle};

use crate::ui::prelude::{OutputFormat, get_output_format};

pub fn create_spinner(message: String) -> ProgressBar {
    // Spinners would interleave with JSON events
    if get_output_format() == OutputFormat::Json {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner} {msg}") {
        pb.set_style(style.tick_chars("⠁⠉⠙⠚⠒⠂⠒⠲⠴⠤⠄⠤⠦⠖⠒⠐⠒⠓⠋ "));
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Finish a spinner and print a success message with a checkmark
pub fn finish_spinner_with_success(pb: ProgressBar, message: impl Into<String>) {
    pb.finish_and_clear();
    if get_output_format() == OutputFormat::Text {
        println!("✓ {}", message.into());
    }
}
