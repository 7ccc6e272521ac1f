//! `plateflow submit` and `plateflow resubmit`.

use crate::cli::args::{ResubmitArgs, SubmitArgs};
use crate::error::Result;
use crate::runner::Driver;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandEnv, CommandResult};
use super::display::{report_outcome, resolve_monitor, with_status_sink};

/// Registers a submission for a planned step and monitors it to the end.
pub struct SubmitCommand {
    env: CommandEnv,
    args: SubmitArgs,
}

impl SubmitCommand {
    pub fn new(env: CommandEnv, args: SubmitArgs) -> Self {
        Self { env, args }
    }
}

impl Command for SubmitCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let target = &self.args.target;
        let mut ctx = self.env.open()?;
        let monitor = resolve_monitor(&ctx.config().monitoring, &self.args.monitor);
        let mut engine = ctx.local_engine()?;

        ui.show_header(&format!(
            "Submitting {} for experiment {}",
            target.step, target.experiment
        ));
        let outcome = {
            let mut driver = Driver::new(&mut ctx, target.experiment, &target.step)?;
            with_status_sink(ui, |sink| {
                driver.submit(engine.as_mut(), &monitor, sink, self.args.collect)
            })?
        };
        ctx.close();

        report_outcome(ui, &outcome)
    }
}

/// Re-runs jobs of the latest submission, from `--index` or the first
/// job that did not succeed.
pub struct ResubmitCommand {
    env: CommandEnv,
    args: ResubmitArgs,
}

impl ResubmitCommand {
    pub fn new(env: CommandEnv, args: ResubmitArgs) -> Self {
        Self { env, args }
    }
}

impl Command for ResubmitCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let target = &self.args.target;
        let mut ctx = self.env.open()?;
        let monitor = resolve_monitor(&ctx.config().monitoring, &self.args.monitor);
        let mut engine = ctx.local_engine()?;

        ui.show_header(&format!(
            "Resubmitting {} for experiment {}",
            target.step, target.experiment
        ));
        let outcome = {
            let mut driver = Driver::new(&mut ctx, target.experiment, &target.step)?;
            with_status_sink(ui, |sink| {
                driver.resubmit(
                    engine.as_mut(),
                    self.args.index,
                    &monitor,
                    sink,
                    self.args.collect,
                )
            })?
        };
        ctx.close();

        report_outcome(ui, &outcome)
    }
}
