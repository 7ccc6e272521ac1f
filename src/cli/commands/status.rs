//! `plateflow status <experiment> <step>`
//!
//! Shows the latest submission and a depth-bounded snapshot of its task
//! tree. The snapshot is read without advancing the engine.

use crate::cli::args::StatusArgs;
use crate::error::Result;
use crate::monitor::{failure_message, status_table};
use crate::runner::Driver;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandEnv, CommandResult};
use super::display::show_submission;

pub struct StatusCommand {
    env: CommandEnv,
    args: StatusArgs,
}

impl StatusCommand {
    pub fn new(env: CommandEnv, args: StatusArgs) -> Self {
        Self { env, args }
    }
}

impl Command for StatusCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let target = &self.args.target;
        let mut ctx = self.env.open()?;
        let depth = self
            .args
            .depth
            .map_or(ctx.config().monitoring.depth, |d| {
                usize::try_from(d.max(0)).unwrap_or(usize::MAX)
            });
        let mut engine = ctx.local_engine()?;
        let (submission, snapshot) = Driver::new(&mut ctx, target.experiment, &target.step)?
            .status(engine.as_mut(), Some(depth))?;
        ctx.close();

        if self.args.json {
            let doc = serde_json::json!({
                "submission": submission,
                "tree": snapshot,
            });
            let text = serde_json::to_string_pretty(&doc)
                .map_err(|e| anyhow::anyhow!("Failed to render status: {}", e))?;
            ui.message(&text);
            return Ok(CommandResult::success());
        }

        ui.show_header(&format!(
            "Experiment {} - {}",
            target.experiment, target.step
        ));
        show_submission(ui, &submission);
        ui.message("");
        ui.message(&status_table(&snapshot).render());
        for node in snapshot.failed_nodes() {
            ui.error(&failure_message(node));
        }
        Ok(CommandResult::success())
    }
}
