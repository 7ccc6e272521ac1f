//! `plateflow workflow <experiment> [name]`

use std::fs;
use std::path::Path;

use crate::cli::args::WorkflowArgs;
use crate::config::WorkflowConfig;
use crate::error::{PlateflowError, Result};
use crate::runner::{StepStatus, WorkflowOptions, WorkflowProgress, WorkflowRunner};
use crate::ui::{Table, UserInterface};

use super::dispatcher::{Command, CommandEnv, CommandResult};
use super::display::{resolve_monitor, with_status_sink};

/// Plans, submits and collects every active step of a workflow.
pub struct WorkflowCommand {
    env: CommandEnv,
    args: WorkflowArgs,
}

impl WorkflowCommand {
    pub fn new(env: CommandEnv, args: WorkflowArgs) -> Self {
        Self { env, args }
    }
}

fn read_workflow(path: &Path) -> Result<WorkflowConfig> {
    if !path.is_file() {
        return Err(PlateflowError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| PlateflowError::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn log_progress(event: WorkflowProgress<'_>) {
    match event {
        WorkflowProgress::StageStarting { name, mode } => {
            tracing::info!("Stage {} ({:?})", name, mode)
        }
        WorkflowProgress::StepStarting { stage, step } => {
            tracing::info!("Running {} of stage {}", step, stage)
        }
        WorkflowProgress::StepFinished { result } => {
            tracing::info!("Step {} finished: {:?}", result.step, result.status)
        }
        WorkflowProgress::StepSkipped { step } => tracing::info!("Skipping {}", step),
    }
}

fn describe(status: &StepStatus) -> (String, String) {
    match status {
        StepStatus::Collected {
            submission_id,
            summary,
        } => (submission_id.to_string(), format!("collected ({})", summary)),
        StepStatus::JobsFailed {
            submission_id,
            failed,
        } => (
            submission_id.to_string(),
            format!("{} job(s) failed", failed.len()),
        ),
        StepStatus::Stopped { submission_id } => (submission_id.to_string(), "stopped".into()),
        StepStatus::Failed { message } => ("-".into(), message.clone()),
    }
}

impl Command for WorkflowCommand {
    fn execute(&self, ui: &mut dyn UserInterface) -> Result<CommandResult> {
        let mut ctx = self.env.open()?;
        let (name, workflow) = match &self.args.file {
            Some(path) => (path.display().to_string(), read_workflow(path)?),
            None => {
                let workflow =
                    ctx.config()
                        .workflow(&self.args.name)
                        .ok_or_else(|| PlateflowError::NotFound {
                            what: format!("workflow '{}'", self.args.name),
                        })?;
                (self.args.name.clone(), workflow)
            }
        };
        let options = WorkflowOptions {
            from_stage: self.args.from.clone(),
            keep_output: self.args.keep_output,
        };
        let monitor = resolve_monitor(&ctx.config().monitoring, &self.args.monitor);
        let mut engine = ctx.local_engine()?;

        ui.show_header(&format!(
            "Workflow {} for experiment {}",
            name, self.args.experiment
        ));
        let result = {
            let mut runner = WorkflowRunner::new(&mut ctx, self.args.experiment);
            with_status_sink(ui, |sink| {
                runner.run(
                    &name,
                    &workflow,
                    engine.as_mut(),
                    &monitor,
                    sink,
                    &options,
                    &mut log_progress,
                )
            })?
        };
        ctx.close();

        let mut table = Table::new(vec!["Stage", "Step", "Submission", "Result"]);
        for step in &result.steps {
            let (submission, outcome) = describe(&step.status);
            table.add_row(vec![&step.stage, &step.step, &submission, &outcome]);
        }
        if !table.is_empty() {
            ui.message(&table.render());
        }
        if !result.skipped.is_empty() {
            ui.message(&format!("Skipped: {}", result.skipped.join(", ")));
        }

        if result.success {
            ui.success(&format!(
                "Workflow {} finished: {} step(s) collected",
                name,
                result.steps.len()
            ));
            Ok(CommandResult::success())
        } else {
            let failed: Vec<&str> = result
                .failed_steps()
                .iter()
                .map(|s| s.step.as_str())
                .collect();
            ui.error(&format!(
                "Workflow {} failed at step(s): {}",
                name,
                failed.join(", ")
            ));
            Ok(CommandResult::failure(1))
        }
    }
}
