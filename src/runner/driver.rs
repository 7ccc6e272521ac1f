//! Plan, submit, monitor and collect a step of an experiment.

use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collect::{expected_statuses, CollectCoordinator, CollectSummary};
use crate::config::merge_parameters;
use crate::context::AppContext;
use crate::engine::{run_job_from_batch, ExecutionEngine, TaskHandle, TaskState, TaskTree};
use crate::error::{PlateflowError, Result};
use crate::monitor::{snapshot, ExecutionMonitor, StatusNode, StatusSink, Tee};
use crate::plan::{absolute_paths, backup_step, BatchFiles, BatchPlanner, Batches};
use crate::steps::JobContext;
use crate::store::{JobStatus, JobStore, Submission};
use crate::structure::{load_snapshot, ExperimentId, StructuralSnapshot};
use crate::submission::{SubmissionManager, SubmissionPhase};

/// How often `attach` is retried while the engine has not flushed the tree.
const ATTACH_ATTEMPTS: usize = 10;

/// Options of the `plan` operation.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Parameters overriding the configured step defaults.
    pub parameters: Value,
    /// Keep outputs of the previous plan instead of deleting them.
    pub keep_output: bool,
    /// Move previous batches and logs into a backup directory.
    pub backup: bool,
}

/// Result of a submission or resubmission.
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub submission: Submission,
    /// Final snapshot of the whole tree.
    pub snapshot: StatusNode,
    pub failed_jobs: Vec<u32>,
    /// Set when the collect phase ran after a successful run phase.
    pub collected: Option<CollectSummary>,
}

impl SubmitOutcome {
    pub fn succeeded(&self) -> bool {
        self.failed_jobs.is_empty() && self.snapshot.state == TaskState::Terminated
    }
}

/// Drives one step of one experiment through its lifecycle.
pub struct Driver<'a> {
    ctx: &'a mut AppContext,
    experiment_id: ExperimentId,
    step: String,
}

impl<'a> Driver<'a> {
    pub fn new(ctx: &'a mut AppContext, experiment_id: ExperimentId, step: &str) -> Result<Self> {
        ctx.registry().require(step)?;
        Ok(Self {
            ctx,
            experiment_id,
            step: step.to_string(),
        })
    }

    fn batch_files(&self) -> BatchFiles {
        BatchFiles::new(self.ctx.workspace(), self.experiment_id, &self.step)
    }

    fn job_context(&self) -> JobContext {
        JobContext {
            experiment_id: self.experiment_id,
            experiment_dir: self.ctx.workspace().experiment_dir(self.experiment_id),
        }
    }

    fn snapshot(&self) -> Result<StructuralSnapshot> {
        load_snapshot(&self.ctx.workspace().structure_file(self.experiment_id))
    }

    /// Configured defaults merged with `overrides`.
    pub fn parameters(&self, overrides: &Value) -> Value {
        let defaults = self.ctx.config().step_defaults(&self.step);
        match overrides {
            Value::Null => defaults,
            overrides => merge_parameters(&defaults, overrides),
        }
    }

    /// Plan the step and write its batch files.
    pub fn plan(&mut self, options: &PlanOptions) -> Result<Batches> {
        let snapshot = self.snapshot()?;
        let parameters = self.parameters(&options.parameters);
        let step = self.ctx.registry().require(&self.step)?;
        let batches = BatchPlanner::new().plan(step, &parameters, &snapshot)?;

        let files = self.batch_files();
        if files.exists() && !options.keep_output {
            self.remove_previous_outputs(&files)?;
        }
        if options.backup {
            if let Some(dir) =
                backup_step(self.ctx.workspace(), self.experiment_id, &self.step, Utc::now())?
            {
                tracing::info!("Backed up previous batches and logs to {}", dir.display());
            }
        }
        files.write(&batches)?;
        Ok(batches)
    }

    fn remove_previous_outputs(&self, files: &BatchFiles) -> Result<()> {
        let previous = match files.read() {
            Ok(previous) => previous,
            Err(e) => {
                tracing::warn!("Ignoring unreadable previous plan: {}", e);
                return Ok(());
            }
        };
        let outputs = previous.expected_outputs();
        let mut removed = 0;
        for path in absolute_paths(&outputs, Path::new("/")) {
            if path.is_file() {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        tracing::info!("Removed {} output file(s) of the previous plan", removed);
        Ok(())
    }

    /// Execute one run job in this process.
    pub fn run_job(&self, job_id: u32) -> Result<()> {
        tracing::info!("Running job {} of step {}", job_id, self.step);
        run_job_from_batch(
            self.ctx.workspace(),
            self.ctx.registry(),
            self.experiment_id,
            &self.step,
            job_id,
        )
    }

    /// Register a submission, hand the plan to the engine and monitor it.
    pub fn submit(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        monitor: &ExecutionMonitor,
        sink: &mut dyn StatusSink,
        collect: bool,
    ) -> Result<SubmitOutcome> {
        let batches = self.batch_files().read()?;
        let current = self.snapshot()?.fingerprint();
        if current != batches.snapshot_fingerprint {
            return Err(PlateflowError::Precondition {
                message: format!(
                    "the structure of experiment {} changed since step '{}' was planned; plan again",
                    self.experiment_id, self.step
                ),
            });
        }

        let submission = SubmissionManager::new(self.ctx.store_mut())
            .register(self.experiment_id, &self.step)?;
        let tree = TaskTree::from_batches(&batches, Some(self.ctx.config().resources.clone()));
        let handle = engine.store(tree)?;
        self.attach(engine, handle, submission.id)?;

        self.monitor(engine, handle, submission.id, 0, monitor, sink, collect)
    }

    /// Re-run the jobs of the latest submission from `start_index` on.
    ///
    /// Without a start index, the lowest job id that did not terminate
    /// successfully is used.
    pub fn resubmit(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        start_index: Option<u32>,
        monitor: &ExecutionMonitor,
        sink: &mut dyn StatusSink,
        collect: bool,
    ) -> Result<SubmitOutcome> {
        let submission = self.latest()?;
        let top = submission
            .top_task_id
            .clone()
            .ok_or_else(|| PlateflowError::NotFound {
                what: format!("task tree of submission {}", submission.id),
            })?;
        let handle = engine.load(&top)?;
        let tree = engine.tree(handle)?;

        let start = match start_index {
            Some(start) => start,
            None => first_unfinished(&tree).ok_or_else(|| PlateflowError::Precondition {
                message: format!(
                    "every job of submission {} terminated successfully",
                    submission.id
                ),
            })?,
        };
        SubmissionManager::new(self.ctx.store_mut())
            .advance(submission.id, SubmissionPhase::Submitted)?;
        tracing::info!(
            "Resubmitting submission {} from job {}",
            submission.id,
            start
        );

        self.monitor(engine, handle, submission.id, start, monitor, sink, collect)
    }

    fn attach(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        handle: TaskHandle,
        submission_id: u64,
    ) -> Result<()> {
        for attempt in 1..=ATTACH_ATTEMPTS {
            let tree = engine.tree(handle)?;
            match SubmissionManager::new(self.ctx.store_mut()).attach(submission_id, &tree) {
                Err(PlateflowError::NotPersisted { .. }) if attempt < ATTACH_ATTEMPTS => {
                    tracing::debug!("Task tree not persisted yet, attempt {}", attempt);
                    engine.progress()?;
                }
                other => return other.map(|_| ()),
            }
        }
        Err(PlateflowError::NotPersisted { submission_id })
    }

    #[allow(clippy::too_many_arguments)]
    fn monitor(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        handle: TaskHandle,
        submission_id: u64,
        start_index: u32,
        monitor: &ExecutionMonitor,
        sink: &mut dyn StatusSink,
        collect: bool,
    ) -> Result<SubmitOutcome> {
        let final_snapshot = {
            let mut recorder = StatusRecorder {
                store: self.ctx.store_mut(),
                submission_id,
            };
            let mut tee = Tee::new(&mut recorder, sink);
            monitor.run(engine, handle, start_index, &mut tee)?
        };

        let mut manager = SubmissionManager::new(self.ctx.store_mut());
        manager.record_statuses(submission_id, &final_snapshot)?;
        let phase = match final_snapshot.state {
            TaskState::Stopped => SubmissionPhase::Stopped,
            _ => SubmissionPhase::Terminated,
        };
        let submission = manager.advance(submission_id, phase)?;
        let failed_jobs = final_snapshot.failed_job_ids();

        let mut outcome = SubmitOutcome {
            submission,
            snapshot: final_snapshot,
            failed_jobs,
            collected: None,
        };
        if collect && outcome.succeeded() {
            outcome.collected = Some(self.collect(false)?);
            if let Some(s) = self.ctx.store().submission(submission_id)? {
                outcome.submission = s;
            }
        }
        Ok(outcome)
    }

    /// Latest attached submission of this step.
    pub fn latest(&mut self) -> Result<Submission> {
        SubmissionManager::new(self.ctx.store_mut()).latest(self.experiment_id, &self.step)
    }

    /// Run the gated collect phase of the latest submission.
    pub fn collect(&mut self, force: bool) -> Result<CollectSummary> {
        let submission = self.latest()?;
        let batches = self.batch_files().read()?;
        let run_ids: Vec<u32> = batches.run.iter().map(|j| j.id).collect();
        let recorded = self.ctx.store().job_statuses(submission.id)?;
        let statuses = expected_statuses(&run_ids, &recorded);
        let ctx = self.job_context();

        let registry = self.ctx.shared_registry();
        let step = registry.require(&self.step)?;
        CollectCoordinator::new(self.ctx.store_mut())
            .force(force)
            .invoke(submission.id, step, &batches.collect, &ctx, &statuses)
    }

    /// Snapshot of the latest submission's tree without advancing it.
    pub fn status(
        &mut self,
        engine: &mut dyn ExecutionEngine,
        depth: Option<usize>,
    ) -> Result<(Submission, StatusNode)> {
        let submission = self.latest()?;
        let top = submission.top_task_id.clone().unwrap_or_default();
        let handle = engine.load(&top)?;
        let tree = engine.tree(handle)?;
        Ok((submission, snapshot(&tree.root, depth)))
    }

    /// Stop the latest submission's tree.
    pub fn stop(&mut self, engine: &mut dyn ExecutionEngine) -> Result<Submission> {
        let submission = self.latest()?;
        let top = submission.top_task_id.clone().unwrap_or_default();
        let handle = engine.load(&top)?;
        engine.stop(handle)?;
        let mut manager = SubmissionManager::new(self.ctx.store_mut());
        if matches!(
            submission.phase,
            SubmissionPhase::Submitted | SubmissionPhase::Running
        ) {
            return manager.advance(submission.id, SubmissionPhase::Stopped);
        }
        Ok(submission)
    }

    /// Delete outputs, batch files, session files and logs of the step.
    ///
    /// Returns the number of removed output files.
    pub fn cleanup(&mut self) -> Result<usize> {
        let files = self.batch_files();
        let mut removed = 0;
        if files.exists() {
            let batches = files.read()?;
            for path in absolute_paths(&batches.expected_outputs(), Path::new("/")) {
                if path.is_file() {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }
        files.remove()?;
        let ws = self.ctx.workspace();
        for dir in [
            ws.session_dir(self.experiment_id, &self.step),
            ws.log_dir(self.experiment_id, &self.step),
        ] {
            if dir.is_dir() {
                tracing::debug!("Removing {}", dir.display());
                fs::remove_dir_all(&dir)?;
            }
        }
        tracing::info!(
            "Cleaned up step '{}' of experiment {}: {} output file(s) removed",
            self.step,
            self.experiment_id,
            removed
        );
        Ok(removed)
    }

    /// Stdout and stderr log files of a run job, or of the collect job.
    pub fn log_files(&self, job_id: Option<u32>) -> (PathBuf, PathBuf) {
        let ws = self.ctx.workspace();
        (
            ws.job_log_file(self.experiment_id, &self.step, job_id, "out"),
            ws.job_log_file(self.experiment_id, &self.step, job_id, "err"),
        )
    }
}

/// Lowest job id that did not terminate successfully.
fn first_unfinished(tree: &TaskTree) -> Option<u32> {
    tree.jobs()
        .filter(|n| n.job_status() != JobStatus::TerminatedOk)
        .filter_map(|n| n.job_id())
        .min()
}

/// Persists the job fan-out of every snapshot and marks the submission
/// running once the engine reports activity.
struct StatusRecorder<'s> {
    store: &'s mut dyn JobStore,
    submission_id: u64,
}

impl StatusSink for StatusRecorder<'_> {
    fn emit(&mut self, snapshot: &StatusNode, _elapsed: Duration) -> Result<()> {
        let running = snapshot.state == TaskState::Running
            && self
                .store
                .submission(self.submission_id)?
                .is_some_and(|s| s.phase == SubmissionPhase::Submitted);
        let mut manager = SubmissionManager::new(&mut *self.store);
        manager.record_statuses(self.submission_id, snapshot)?;
        if running {
            manager.advance(self.submission_id, SubmissionPhase::Running)?;
        }
        Ok(())
    }

    fn failure(&mut self, _node: &StatusNode) -> Result<()> {
        Ok(())
    }
}
