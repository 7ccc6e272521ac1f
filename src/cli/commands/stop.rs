//! `plateflow stop <experiment> <step>`

use crate::cli::args::StopArgs;
use crate::error::Result;
use crate::runner::Driver;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandEnv, CommandResult};

/// Stops the task tree of the latest submission. A monitor watching it
/// observes `STOPPED` on its next status pull.
pub struct StopCommand {
    env: CommandEnv,
    args: StopArgs,
}

impl StopCommand {
    pub fn new(env: CommandEnv, args: StopArgs) -> Self {
        Self { env, args }
    }
}

impl Command for StopCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let target = &self.args.target;
        let mut ctx = self.env.open()?;
        let mut engine = ctx.local_engine()?;
        let submission =
            Driver::new(&mut ctx, target.experiment, &target.step)?.stop(engine.as_mut())?;
        ctx.close();
        ui.success(&format!(
            "Stopped submission {} ({})",
            submission.id, submission.phase
        ));
        Ok(CommandResult::success())
    }
}
