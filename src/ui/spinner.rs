//! Spinner shown while the monitor sleeps between status pulls.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::theme::PlateflowTheme;
use super::SpinnerHandle;

pub struct ProgressSpinner {
    bar: ProgressBar,
    theme: PlateflowTheme,
}

impl ProgressSpinner {
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
                .template("{spinner:.cyan} {msg} {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        Self {
            bar,
            theme: PlateflowTheme::new(),
        }
    }

    /// Spinner that draws nothing.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            theme: PlateflowTheme::plain(),
        }
    }

    fn finish_with(&mut self, line: String) {
        self.bar.set_style(
            ProgressStyle::default_spinner()
                .template("{msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        self.bar.finish_with_message(line);
    }

    pub fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }
}

impl SpinnerHandle for ProgressSpinner {
    fn set_message(&mut self, msg: &str) {
        self.bar.set_message(msg.to_string());
    }

    fn finish_success(&mut self, msg: &str) {
        let line = self.theme.format_success(msg);
        self.finish_with(line);
    }

    fn finish_error(&mut self, msg: &str) {
        let line = self.theme.format_error(msg);
        self.finish_with(line);
    }

    // the wait spinner is cleared rather than left behind
    fn finish_skipped(&mut self, _msg: &str) {
        self.bar.finish_and_clear();
    }
}
