//! Colors and message prefixes.

use console::Style;

use crate::store::JobStatus;

#[derive(Debug, Clone)]
pub struct PlateflowTheme {
    pub success: Style,
    pub warning: Style,
    pub error: Style,
    /// Running jobs and headers.
    pub info: Style,
    pub dim: Style,
    pub highlight: Style,
    /// Keys in `key: value` listings.
    pub key: Style,
}

impl Default for PlateflowTheme {
    fn default() -> Self {
        Self::new()
    }
}

impl PlateflowTheme {
    pub fn new() -> Self {
        Self {
            success: Style::new().green(),
            warning: Style::new().yellow(),
            error: Style::new().red().bold(),
            info: Style::new().cyan(),
            dim: Style::new().dim(),
            highlight: Style::new().bold(),
            key: Style::new().bold(),
        }
    }

    /// No styling, for pipes and `--no-color`.
    pub fn plain() -> Self {
        Self {
            success: Style::new(),
            warning: Style::new(),
            error: Style::new(),
            info: Style::new(),
            dim: Style::new(),
            highlight: Style::new(),
            key: Style::new(),
        }
    }

    pub fn format_success(&self, msg: &str) -> String {
        self.success.apply_to(format!("✓ {}", msg)).to_string()
    }

    pub fn format_warning(&self, msg: &str) -> String {
        self.warning.apply_to(format!("⚠ {}", msg)).to_string()
    }

    pub fn format_error(&self, msg: &str) -> String {
        self.error.apply_to(format!("✗ {}", msg)).to_string()
    }

    pub fn format_skipped(&self, msg: &str) -> String {
        self.dim.apply_to(format!("○ {}", msg)).to_string()
    }

    pub fn format_header(&self, title: &str) -> String {
        format!("{} {}", self.info.apply_to("▣"), self.highlight.apply_to(title))
    }

    pub fn format_key_value(&self, key: &str, value: &str) -> String {
        format!("{} {}", self.key.apply_to(format!("{}:", key)), value)
    }

    /// Style matching a job status.
    pub fn status(&self, status: JobStatus) -> &Style {
        match status {
            JobStatus::TerminatedOk => &self.success,
            JobStatus::TerminatedFailed => &self.error,
            JobStatus::Stopped => &self.warning,
            JobStatus::Running | JobStatus::Submitted => &self.info,
            JobStatus::Created => &self.dim,
        }
    }
}

/// Colors are off under `NO_COLOR` and when stdout is not a terminal.
pub fn should_use_colors() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    console::Term::stdout().is_term()
}
