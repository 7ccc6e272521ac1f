//! `plateflow plan <experiment> <step>`

use crate::cli::args::PlanArgs;
use crate::error::Result;
use crate::runner::{Driver, PlanOptions};
use crate::ui::{Table, UserInterface};

use super::dispatcher::{Command, CommandEnv, CommandResult};
use super::display::parse_params;

pub struct PlanCommand {
    env: CommandEnv,
    args: PlanArgs,
}

impl PlanCommand {
    pub fn new(env: CommandEnv, args: PlanArgs) -> Self {
        Self { env, args }
    }
}

impl Command for PlanCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let options = PlanOptions {
            parameters: parse_params(&self.args.params)?,
            keep_output: self.args.keep_output,
            backup: self.args.backup,
        };
        let target = &self.args.target;
        let mut ctx = self.env.open()?;
        let batches = Driver::new(&mut ctx, target.experiment, &target.step)?.plan(&options)?;
        ctx.close();

        ui.show_header(&format!(
            "Experiment {} - {}",
            target.experiment, target.step
        ));
        if ui.output_mode().shows_snapshots() && !batches.run.is_empty() {
            let mut table = Table::new(vec!["Job", "Inputs", "Outputs"])
                .align_right(0)
                .align_right(1)
                .align_right(2);
            for job in &batches.run {
                let count = |m: &crate::plan::PathMap| m.values().map(Vec::len).sum::<usize>();
                table.add_row(vec![
                    &job.id.to_string(),
                    &count(&job.inputs).to_string(),
                    &count(&job.outputs).to_string(),
                ]);
            }
            ui.message(&table.render());
        }
        ui.success(&format!(
            "Planned {} run job(s) and 1 collect job",
            batches.run.len()
        ));
        Ok(CommandResult::success())
    }
}
