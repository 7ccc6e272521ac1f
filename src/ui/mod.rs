//! Operator-facing output.
//!
//! - [`UserInterface`] trait, implemented by [`TerminalUI`] for a TTY,
//!   [`NonInteractiveUI`] for pipes and CI logs, and [`MockUI`] for tests
//! - spinners shown while the monitor waits between status pulls
//! - tables for status snapshots
//!
//! # Example
//!
//! ```
//! use plateflow::ui::{create_ui, OutputMode};
//!
//! let mut ui = create_ui(false, OutputMode::Quiet);
//! ui.show_header("Experiment 11");
//! ui.success("Collected 42 records");
//! ```

pub mod mock;
pub mod non_interactive;
pub mod output;
pub mod prompts;
pub mod spinner;
pub mod table;
pub mod terminal;
pub mod theme;

pub use mock::{MockSpinner, MockUI, SpinnerStatus};
pub use non_interactive::NonInteractiveUI;
pub use output::OutputMode;
pub use prompts::prompt_user;
pub use spinner::ProgressSpinner;
pub use table::Table;
pub use terminal::{create_ui, TerminalUI};
pub use theme::{should_use_colors, PlateflowTheme};

use crate::error::Result;

/// Everything a command writes or asks goes through this trait.
pub trait UserInterface {
    fn output_mode(&self) -> OutputMode;

    /// Plain line on stdout.
    fn message(&mut self, msg: &str);

    fn success(&mut self, msg: &str);

    fn warning(&mut self, msg: &str);

    /// Shown in every output mode.
    fn error(&mut self, msg: &str);

    /// Ask the operator.
    fn prompt(&mut self, prompt: &Prompt) -> Result<PromptResult>;

    fn start_spinner(&mut self, message: &str) -> Box<dyn SpinnerHandle>;

    fn show_header(&mut self, title: &str);

    fn is_interactive(&self) -> bool;

    /// Ask a yes/no question with a default answer.
    fn confirm(&mut self, key: &str, question: &str, default: bool) -> Result<bool> {
        let answer = self.prompt(&Prompt {
            key: key.to_string(),
            question: question.to_string(),
            prompt_type: PromptType::Confirm,
            default: Some(default.to_string()),
        })?;
        Ok(answer.as_bool().unwrap_or(default))
    }
}

/// Handle for a running spinner.
pub trait SpinnerHandle {
    fn set_message(&mut self, msg: &str);

    fn finish_success(&mut self, msg: &str);

    fn finish_error(&mut self, msg: &str);

    fn finish_skipped(&mut self, msg: &str);
}

/// A question for the operator.
#[derive(Debug, Clone)]
pub struct Prompt {
    /// Stable key; non-interactive runs look up `PLATEFLOW_PROMPT_<KEY>`.
    pub key: String,
    pub question: String,
    pub prompt_type: PromptType,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptType {
    /// Yes/no.
    Confirm,
    /// Free-form text.
    Input,
}

/// Answer to a [`Prompt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResult {
    Bool(bool),
    String(String),
}

impl PromptResult {
    pub fn as_string(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::String(s) => s.clone(),
        }
    }

    /// Booleans, and strings spelling yes or no.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) => parse_yes_no(s),
        }
    }
}

/// `true`/`yes`/`y`/`1` and their negations, case-insensitive.
pub(crate) fn parse_yes_no(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_result_as_string() {
        assert_eq!(PromptResult::Bool(true).as_string(), "true");
        assert_eq!(PromptResult::String("abc".into()).as_string(), "abc");
    }

    #[test]
    fn string_answers_parse_as_bool() {
        assert_eq!(PromptResult::String("Yes".into()).as_bool(), Some(true));
        assert_eq!(PromptResult::String("n".into()).as_bool(), Some(false));
        assert_eq!(PromptResult::String("maybe".into()).as_bool(), None);
    }

    #[test]
    fn confirm_uses_default_when_unanswered() {
        let mut ui = MockUI::new();
        assert!(ui.confirm("cleanup", "Delete?", true).unwrap());
        ui.set_prompt_response("cleanup", "no");
        assert!(!ui.confirm("cleanup", "Delete?", true).unwrap());
    }
}
