//! `plateflow steps [name]`

use crate::cli::args::StepsArgs;
use crate::error::Result;
use crate::ui::{Table, UserInterface};

use super::dispatcher::{Command, CommandEnv, CommandResult};

/// Lists registered steps, or shows one step's parameter schema and
/// configured defaults.
pub struct StepsCommand {
    env: CommandEnv,
    args: StepsArgs,
}

impl StepsCommand {
    pub fn new(env: CommandEnv, args: StepsArgs) -> Self {
        Self { env, args }
    }
}

fn pretty(value: &serde_json::Value) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| anyhow::anyhow!("{}", e).into())
}

impl Command for StepsCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let ctx = self.env.open()?;

        match &self.args.name {
            Some(name) => {
                let step = ctx.registry().require(name)?;
                ui.show_header(&format!("{} - {}", step.name(), step.description()));
                ui.message("Parameters:");
                ui.message(&pretty(&step.parameter_schema())?);
                ui.message("Configured defaults:");
                ui.message(&pretty(&ctx.config().step_defaults(name))?);
            }
            None => {
                let mut table = Table::new(vec!["Step", "Description"]);
                for step in ctx.registry().iter() {
                    table.add_row(vec![step.name(), step.description()]);
                }
                ui.message(&table.render());
            }
        }
        ctx.close();
        Ok(CommandResult::success())
    }
}
