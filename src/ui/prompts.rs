//! Interactive prompts.

use console::{style, Term};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Input};

use crate::error::{PlateflowError, Result};

use super::{parse_yes_no, Prompt, PromptResult, PromptType};

fn map_dialoguer_err(e: dialoguer::Error) -> PlateflowError {
    PlateflowError::Io(e.into())
}

fn prompt_theme() -> ColorfulTheme {
    ColorfulTheme {
        prompt_prefix: style("?".to_string()).cyan(),
        ..ColorfulTheme::default()
    }
}

/// Ask on `term` and wait for the answer.
pub fn prompt_user(prompt: &Prompt, term: &Term) -> Result<PromptResult> {
    match prompt.prompt_type {
        PromptType::Confirm => {
            let default = prompt
                .default
                .as_deref()
                .and_then(parse_yes_no)
                .unwrap_or(false);
            let answer = Confirm::with_theme(&prompt_theme())
                .with_prompt(&prompt.question)
                .default(default)
                .interact_on(term)
                .map_err(map_dialoguer_err)?;
            Ok(PromptResult::Bool(answer))
        }
        PromptType::Input => {
            let theme = prompt_theme();
            let mut input = Input::<String>::with_theme(&theme).with_prompt(&prompt.question);
            if let Some(default) = &prompt.default {
                input = input.default(default.clone());
            }
            let answer = input.interact_on(term).map_err(map_dialoguer_err)?;
            Ok(PromptResult::String(answer))
        }
    }
}
