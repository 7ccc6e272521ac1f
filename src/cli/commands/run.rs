//! `plateflow run <experiment> <step> <job>`
//!
//! Executes one run job in this process. The command runner of the local
//! engine spawns this per job; it is also handy for debugging a single job.

use crate::cli::args::RunArgs;
use crate::error::Result;
use crate::runner::Driver;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandEnv, CommandResult};

pub struct RunCommand {
    env: CommandEnv,
    args: RunArgs,
}

impl RunCommand {
    pub fn new(env: CommandEnv, args: RunArgs) -> Self {
        Self { env, args }
    }
}

impl Command for RunCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let target = &self.args.target;
        let mut ctx = self.env.open()?;
        Driver::new(&mut ctx, target.experiment, &target.step)?.run_job(self.args.job)?;
        ctx.close();
        ui.success(&format!("{} job {} done", target.step, self.args.job));
        Ok(CommandResult::success())
    }
}
