//! `plateflow cleanup <experiment> <step>`

use crate::cli::args::CleanupArgs;
use crate::error::Result;
use crate::runner::Driver;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandEnv, CommandResult};

/// Deletes the step's outputs, batch files, session files and logs after
/// confirmation.
pub struct CleanupCommand {
    env: CommandEnv,
    args: CleanupArgs,
}

impl CleanupCommand {
    pub fn new(env: CommandEnv, args: CleanupArgs) -> Self {
        Self { env, args }
    }
}

impl Command for CleanupCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let target = &self.args.target;
        let confirmed = self.args.yes
            || ui.confirm(
                "cleanup",
                &format!(
                    "Delete all outputs, batches and logs of {} for experiment {}?",
                    target.step, target.experiment
                ),
                false,
            )?;
        if !confirmed {
            ui.warning("Cleanup cancelled");
            return Ok(CommandResult::failure(1));
        }

        let mut ctx = self.env.open()?;
        let removed = Driver::new(&mut ctx, target.experiment, &target.step)?.cleanup()?;
        ctx.close();
        ui.success(&format!(
            "Cleaned up {}: {} output file(s) removed",
            target.step, removed
        ));
        Ok(CommandResult::success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::StepTarget;
    use crate::plan::BatchFiles;
    use crate::structure::{save_snapshot, ExperimentId};
    use crate::ui::MockUI;
    use crate::workspace::Workspace;
    use tempfile::TempDir;

    fn planned() -> (TempDir, BatchFiles) {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        save_snapshot(
            &ws.structure_file(ExperimentId(11)),
            &crate::steps::testing::snapshot(),
        )
        .unwrap();
        let mut ctx = CommandEnv::new(temp.path(), None).open().unwrap();
        Driver::new(&mut ctx, ExperimentId(11), "corilla")
            .unwrap()
            .plan(&Default::default())
            .unwrap();
        ctx.close();
        let files = BatchFiles::new(&ws, ExperimentId(11), "corilla");
        (temp, files)
    }

    fn cleanup(temp: &TempDir, yes: bool) -> CleanupCommand {
        CleanupCommand::new(
            CommandEnv::new(temp.path(), None),
            CleanupArgs {
                target: StepTarget {
                    experiment: ExperimentId(11),
                    step: "corilla".into(),
                },
                yes,
            },
        )
    }

    #[test]
    fn declined_confirmation_keeps_files() {
        let (temp, files) = planned();
        let mut ui = MockUI::new();
        ui.set_prompt_response("cleanup", "no");

        let result = cleanup(&temp, false).execute(&mut ui).unwrap();

        assert!(!result.success);
        assert!(files.exists());
        assert!(ui.has_warning("cancelled"));
    }

    #[test]
    fn yes_flag_skips_prompt() {
        let (temp, files) = planned();
        let mut ui = MockUI::new();

        let result = cleanup(&temp, true).execute(&mut ui).unwrap();

        assert!(result.success);
        assert!(ui.prompts_shown().is_empty());
        assert!(!files.exists());
    }
}
