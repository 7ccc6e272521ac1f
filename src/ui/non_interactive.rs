//! Line-oriented UI for pipes, CI logs and job subprocesses.

use std::collections::HashMap;

use crate::error::{PlateflowError, Result};

use super::theme::PlateflowTheme;
use super::{parse_yes_no, OutputMode, Prompt, PromptResult, PromptType, SpinnerHandle, UserInterface};

const PROMPT_ENV_PREFIX: &str = "PLATEFLOW_PROMPT_";

/// Never blocks on input: prompts are answered from
/// `PLATEFLOW_PROMPT_<KEY>` or the prompt's default.
pub struct NonInteractiveUI {
    mode: OutputMode,
    theme: PlateflowTheme,
    overrides: HashMap<String, String>,
}

impl NonInteractiveUI {
    pub fn new(mode: OutputMode) -> Self {
        let overrides = std::env::vars()
            .filter(|(k, _)| k.starts_with(PROMPT_ENV_PREFIX))
            .collect();
        Self::with_overrides(mode, overrides)
    }

    /// Explicit answers keyed like the environment variables.
    pub fn with_overrides(mode: OutputMode, overrides: HashMap<String, String>) -> Self {
        Self {
            mode,
            theme: PlateflowTheme::plain(),
            overrides,
        }
    }
}

impl UserInterface for NonInteractiveUI {
    fn output_mode(&self) -> OutputMode {
        self.mode
    }

    fn message(&mut self, msg: &str) {
        if self.mode.shows_status() {
            println!("{}", msg);
        }
    }

    fn success(&mut self, msg: &str) {
        if self.mode.shows_status() {
            println!("{}", self.theme.format_success(msg));
        }
    }

    fn warning(&mut self, msg: &str) {
        if self.mode.shows_status() {
            eprintln!("{}", self.theme.format_warning(msg));
        }
    }

    fn error(&mut self, msg: &str) {
        eprintln!("{}", self.theme.format_error(msg));
    }

    fn prompt(&mut self, prompt: &Prompt) -> Result<PromptResult> {
        let env_key = format!("{}{}", PROMPT_ENV_PREFIX, prompt.key.to_uppercase());
        let answer = self
            .overrides
            .get(&env_key)
            .or(prompt.default.as_ref())
            .ok_or_else(|| PlateflowError::Precondition {
                message: format!(
                    "cannot ask '{}' without a terminal; set {}",
                    prompt.question, env_key
                ),
            })?;

        match prompt.prompt_type {
            PromptType::Confirm => parse_yes_no(answer).map(PromptResult::Bool).ok_or_else(|| {
                PlateflowError::Precondition {
                    message: format!("'{}' is not a yes/no answer for {}", answer, env_key),
                }
            }),
            PromptType::Input => Ok(PromptResult::String(answer.clone())),
        }
    }

    fn start_spinner(&mut self, message: &str) -> Box<dyn SpinnerHandle> {
        if self.mode.shows_spinners() {
            println!("{}", message);
        }
        Box::new(LineSpinner {
            theme: self.theme.clone(),
            mode: self.mode,
        })
    }

    fn show_header(&mut self, title: &str) {
        if self.mode.shows_status() {
            println!("\n{}\n", title);
        }
    }

    fn is_interactive(&self) -> bool {
        false
    }
}

/// Prints only the final line of a spinner.
struct LineSpinner {
    theme: PlateflowTheme,
    mode: OutputMode,
}

impl SpinnerHandle for LineSpinner {
    fn set_message(&mut self, _msg: &str) {}

    fn finish_success(&mut self, msg: &str) {
        if self.mode.shows_status() {
            println!("{}", self.theme.format_success(msg));
        }
    }

    fn finish_error(&mut self, msg: &str) {
        eprintln!("{}", self.theme.format_error(msg));
    }

    fn finish_skipped(&mut self, _msg: &str) {}
}
