//! Job runners used by the local engine.

use std::fs::{self, File};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{PlateflowError, Result};
use crate::plan::BatchFiles;
use crate::steps::{JobContext, StepRegistry};
use crate::structure::ExperimentId;
use crate::workspace::Workspace;

/// Executes one run job and reports its exit code.
///
/// An `Err` means the job could not be started at all; a job that ran and
/// failed returns a non-zero exit code.
pub trait JobRunner {
    fn run(&self, experiment_id: ExperimentId, step: &str, job_id: u32) -> Result<i32>;
}

/// Read a job's batch file and execute it with its step.
pub fn run_job_from_batch(
    workspace: &Workspace,
    registry: &StepRegistry,
    experiment_id: ExperimentId,
    step_name: &str,
    job_id: u32,
) -> Result<()> {
    let step = registry.require(step_name)?;
    let job = BatchFiles::new(workspace, experiment_id, step_name).read_job(job_id)?;
    let ctx = JobContext {
        experiment_id,
        experiment_dir: workspace.experiment_dir(experiment_id),
    };
    step.run_job(&job, &ctx)
}

/// Calls the step's run routine inside the current process.
///
/// A failing job gets exit code 1 and its error message written to the
/// job's `.err` log file.
pub struct InProcessRunner {
    workspace: Workspace,
    registry: Arc<StepRegistry>,
}

impl InProcessRunner {
    pub fn new(workspace: Workspace, registry: Arc<StepRegistry>) -> Self {
        Self {
            workspace,
            registry,
        }
    }
}

impl JobRunner for InProcessRunner {
    fn run(&self, experiment_id: ExperimentId, step: &str, job_id: u32) -> Result<i32> {
        let start = Instant::now();
        let outcome = run_job_from_batch(
            &self.workspace,
            &self.registry,
            experiment_id,
            step,
            job_id,
        );

        let log_dir = self.workspace.log_dir(experiment_id, step);
        self.workspace.ensure_dir(&log_dir)?;
        let out = self
            .workspace
            .job_log_file(experiment_id, step, Some(job_id), "out");
        let err = self
            .workspace
            .job_log_file(experiment_id, step, Some(job_id), "err");

        match outcome {
            Ok(()) => {
                fs::write(
                    &out,
                    format!("job {} finished in {:.2?}\n", job_id, start.elapsed()),
                )?;
                fs::write(&err, "")?;
                Ok(0)
            }
            Err(e) => {
                tracing::debug!("Job {} of {} failed: {}", job_id, step, e);
                fs::write(&out, "")?;
                fs::write(&err, format!("{}\n", e))?;
                Ok(1)
            }
        }
    }
}

/// Spawns `<program> --root <root> run <experiment> <step> <job>` per job,
/// capturing stdout and stderr into the step's log directory.
pub struct CommandRunner {
    program: PathBuf,
    workspace: Workspace,
}

impl CommandRunner {
    pub fn new(program: impl Into<PathBuf>, workspace: Workspace) -> Self {
        Self {
            program: program.into(),
            workspace,
        }
    }

    /// Runner spawning the currently running executable.
    pub fn current_exe(workspace: Workspace) -> Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::new(program, workspace))
    }
}

impl JobRunner for CommandRunner {
    fn run(&self, experiment_id: ExperimentId, step: &str, job_id: u32) -> Result<i32> {
        let log_dir = self.workspace.log_dir(experiment_id, step);
        self.workspace.ensure_dir(&log_dir)?;
        let stdout = File::create(
            self.workspace
                .job_log_file(experiment_id, step, Some(job_id), "out"),
        )?;
        let stderr = File::create(
            self.workspace
                .job_log_file(experiment_id, step, Some(job_id), "err"),
        )?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--root")
            .arg(self.workspace.root())
            .arg("run")
            .arg(experiment_id.to_string())
            .arg(step)
            .arg(job_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        tracing::debug!("Spawning {:?}", cmd);
        let status = cmd.status().map_err(|e| {
            PlateflowError::engine(
                "spawn",
                format!("cannot start {}: {}", self.program.display(), e),
            )
        })?;

        // killed by a signal
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BatchPlanner;
    use crate::steps::testing::snapshot;
    use tempfile::TempDir;

    fn planned_workspace(temp: &TempDir) -> Workspace {
        let ws = Workspace::new(temp.path());
        let registry = StepRegistry::with_builtins();
        let step = registry.require("corilla").unwrap();
        let batches = BatchPlanner::new()
            .plan(step, &serde_json::json!({}), &snapshot())
            .unwrap();
        BatchFiles::new(&ws, batches.experiment_id, "corilla")
            .write(&batches)
            .unwrap();
        ws
    }

    #[test]
    fn in_process_runner_succeeds_and_logs() {
        let temp = TempDir::new().unwrap();
        let ws = planned_workspace(&temp);
        let runner = InProcessRunner::new(ws.clone(), Arc::new(StepRegistry::with_builtins()));

        let code = runner.run(ExperimentId(11), "corilla", 1).unwrap();

        assert_eq!(code, 0);
        let out = ws.job_log_file(ExperimentId(11), "corilla", Some(1), "out");
        assert!(fs::read_to_string(out).unwrap().contains("job 1 finished"));
    }

    #[test]
    fn in_process_runner_reports_missing_batch_as_failure() {
        let temp = TempDir::new().unwrap();
        let ws = planned_workspace(&temp);
        let runner = InProcessRunner::new(ws.clone(), Arc::new(StepRegistry::with_builtins()));

        let code = runner.run(ExperimentId(11), "corilla", 99).unwrap();

        assert_eq!(code, 1);
        let err = ws.job_log_file(ExperimentId(11), "corilla", Some(99), "err");
        assert!(!fs::read_to_string(err).unwrap().is_empty());
    }

    #[test]
    fn command_runner_reports_spawn_failure() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        let runner = CommandRunner::new(temp.path().join("no-such-program"), ws);

        let err = runner.run(ExperimentId(1), "corilla", 1).unwrap_err();

        assert!(matches!(err, PlateflowError::EngineCommunication { .. }));
    }
}
