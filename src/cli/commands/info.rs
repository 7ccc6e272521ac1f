//! `plateflow info` and `plateflow log`: inspect a single job.

use std::fs;

use crate::cli::args::{InfoArgs, LogArgs};
use crate::error::{PlateflowError, Result};
use crate::plan::BatchFiles;
use crate::runner::Driver;
use crate::ui::UserInterface;

use super::dispatcher::{Command, CommandEnv, CommandResult};

/// Prints a job description as YAML.
pub struct InfoCommand {
    env: CommandEnv,
    args: InfoArgs,
}

impl InfoCommand {
    pub fn new(env: CommandEnv, args: InfoArgs) -> Self {
        Self { env, args }
    }
}

fn to_yaml<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value)
        .map_err(|e| anyhow::anyhow!("Failed to render job description: {}", e).into())
}

impl Command for InfoCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let target = &self.args.target;
        let ctx = self.env.open()?;
        ctx.registry().require(&target.step)?;
        let files = BatchFiles::new(ctx.workspace(), target.experiment, &target.step);
        let text = match self.args.job {
            Some(id) => to_yaml(&files.read_job(id)?)?,
            None => to_yaml(&files.read_collect()?)?,
        };
        ctx.close();

        let title = match self.args.job {
            Some(id) => format!("{} run job {}", target.step, id),
            None => format!("{} collect job", target.step),
        };
        ui.show_header(&title);
        ui.message(text.trim_end());
        Ok(CommandResult::success())
    }
}

/// Prints the captured stdout or stderr of a job.
pub struct LogCommand {
    env: CommandEnv,
    args: LogArgs,
}

impl LogCommand {
    pub fn new(env: CommandEnv, args: LogArgs) -> Self {
        Self { env, args }
    }
}

impl Command for LogCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let target = &self.args.target;
        let mut ctx = self.env.open()?;
        let (out, err) = Driver::new(&mut ctx, target.experiment, &target.step)?
            .log_files(self.args.job);
        ctx.close();

        let path = if self.args.stderr { err } else { out };
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PlateflowError::NotFound {
                what: format!("log file {}", path.display()),
            },
            _ => PlateflowError::Io(e),
        })?;
        if content.is_empty() {
            ui.warning(&format!("{} is empty", path.display()));
        } else {
            ui.message(content.trim_end());
        }
        Ok(CommandResult::success())
    }
}
