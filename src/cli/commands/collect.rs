//! `plateflow collect <experiment> <step>`

use crate::cli::args::CollectArgs;
use crate::error::Result;
use crate::runner::Driver;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandEnv, CommandResult};

pub struct CollectCommand {
    env: CommandEnv,
    args: CollectArgs,
}

impl CollectCommand {
    pub fn new(env: CommandEnv, args: CollectArgs) -> Self {
        Self { env, args }
    }
}

impl Command for CollectCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let target = &self.args.target;
        let mut ctx = self.env.open()?;
        let mut driver = Driver::new(&mut ctx, target.experiment, &target.step)?;
        let submission = driver.latest()?;
        let mut spinner = ui.start_spinner(&format!(
            "Collecting outputs of submission {}",
            submission.id
        ));
        match driver.collect(self.args.force) {
            Ok(summary) => {
                spinner.finish_success(&format!(
                    "Collected submission {}: {}",
                    submission.id, summary
                ));
                ctx.close();
                ui.success(&format!("{} record(s) merged", summary.total()));
                Ok(CommandResult::success())
            }
            Err(e) => {
                spinner.finish_error(&format!("Collect of submission {} failed", submission.id));
                Err(e)
            }
        }
    }
}
