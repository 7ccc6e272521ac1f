//! Multi-stage workflows.
//!
//! A workflow is an ordered list of stages, each holding steps. Every
//! active step is planned, submitted and collected through [`Driver`];
//! a step counts as done once its collect phase merged its outputs.
//! Stages run in order and the first failed stage ends the workflow.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::collect::CollectSummary;
use crate::config::{StageMode, WorkflowConfig, WorkflowStepConfig};
use crate::context::AppContext;
use crate::engine::{ExecutionEngine, TaskState};
use crate::error::{PlateflowError, Result};
use crate::monitor::{ExecutionMonitor, StatusSink};
use crate::structure::ExperimentId;

use super::driver::{Driver, PlanOptions, SubmitOutcome};

/// Progress events emitted while a workflow runs.
#[derive(Debug)]
pub enum WorkflowProgress<'a> {
    StageStarting { name: &'a str, mode: StageMode },
    StepStarting { stage: &'a str, step: &'a str },
    StepFinished { result: &'a StepResult },
    StepSkipped { step: &'a str },
}

/// Options of a workflow run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowOptions {
    /// Start at this stage; earlier stages are skipped.
    pub from_stage: Option<String>,
    /// Keep outputs of previous plans.
    pub keep_output: bool,
}

/// How a step of a workflow ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Collected {
        submission_id: u64,
        summary: CollectSummary,
    },
    JobsFailed {
        submission_id: u64,
        failed: Vec<u32>,
    },
    Stopped {
        submission_id: u64,
    },
    /// Planning, submission or collect was refused or failed.
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub stage: String,
    pub step: String,
    pub status: StepStatus,
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.status, StepStatus::Collected { .. })
    }
}

/// Result of running a workflow.
#[derive(Debug)]
pub struct WorkflowResult {
    pub workflow: String,
    /// Results of the steps that ran, in run order.
    pub steps: Vec<StepResult>,
    /// Names of steps that did not run.
    pub skipped: Vec<String>,
    pub duration: Duration,
    pub success: bool,
}

impl WorkflowResult {
    pub fn failed_steps(&self) -> Vec<&StepResult> {
        self.steps.iter().filter(|s| !s.succeeded()).collect()
    }
}

/// Runs the stages of a workflow for one experiment.
pub struct WorkflowRunner<'a> {
    ctx: &'a mut AppContext,
    experiment_id: ExperimentId,
}

impl<'a> WorkflowRunner<'a> {
    pub fn new(ctx: &'a mut AppContext, experiment_id: ExperimentId) -> Self {
        Self { ctx, experiment_id }
    }

    /// Check stage names, step names and the start stage before anything
    /// is planned.
    pub fn validate(&self, workflow: &WorkflowConfig, options: &WorkflowOptions) -> Result<()> {
        if workflow.stages.is_empty() {
            return Err(PlateflowError::validation("workflow", "no stages defined"));
        }
        let mut names = BTreeSet::new();
        for stage in &workflow.stages {
            if !names.insert(stage.name.as_str()) {
                return Err(PlateflowError::validation(
                    "workflow",
                    format!("stage '{}' is defined twice", stage.name),
                ));
            }
            for step in &stage.steps {
                self.ctx.registry().require(&step.name)?;
            }
        }
        if let Some(from) = &options.from_stage {
            if !names.contains(from.as_str()) {
                return Err(PlateflowError::NotFound {
                    what: format!("workflow stage '{}'", from),
                });
            }
        }
        Ok(())
    }

    /// Run every active step of every stage.
    ///
    /// Step failures are recorded in the result; only store and engine
    /// errors end the run with an error.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        name: &str,
        workflow: &WorkflowConfig,
        engine: &mut dyn ExecutionEngine,
        monitor: &ExecutionMonitor,
        sink: &mut dyn StatusSink,
        options: &WorkflowOptions,
        on_progress: &mut dyn FnMut(WorkflowProgress<'_>),
    ) -> Result<WorkflowResult> {
        self.validate(workflow, options)?;
        let start = Instant::now();
        let first = options
            .from_stage
            .as_deref()
            .and_then(|from| workflow.stages.iter().position(|s| s.name == from))
            .unwrap_or(0);

        let mut result = WorkflowResult {
            workflow: name.to_string(),
            steps: Vec::new(),
            skipped: Vec::new(),
            duration: Duration::ZERO,
            success: false,
        };
        let mut failed = false;

        for (index, stage) in workflow.stages.iter().enumerate() {
            if index < first || failed {
                for step in &stage.steps {
                    on_progress(WorkflowProgress::StepSkipped { step: &step.name });
                    result.skipped.push(step.name.clone());
                }
                continue;
            }

            tracing::info!("Starting stage '{}' ({:?})", stage.name, stage.mode);
            on_progress(WorkflowProgress::StageStarting {
                name: &stage.name,
                mode: stage.mode,
            });
            let mut stage_failed = false;
            for step in &stage.steps {
                let blocked = stage_failed && stage.mode == StageMode::Sequential;
                if !step.active || blocked {
                    on_progress(WorkflowProgress::StepSkipped { step: &step.name });
                    result.skipped.push(step.name.clone());
                    continue;
                }

                on_progress(WorkflowProgress::StepStarting {
                    stage: &stage.name,
                    step: &step.name,
                });
                let status = self.run_step(step, engine, monitor, sink, options)?;
                let step_result = StepResult {
                    stage: stage.name.clone(),
                    step: step.name.clone(),
                    status,
                };
                if !step_result.succeeded() {
                    tracing::warn!("Step '{}' of stage '{}' did not finish", step.name, stage.name);
                    stage_failed = true;
                }
                on_progress(WorkflowProgress::StepFinished {
                    result: &step_result,
                });
                result.steps.push(step_result);
            }
            failed = stage_failed;
        }

        result.success = !failed;
        result.duration = start.elapsed();
        tracing::info!(
            "Workflow '{}' for experiment {} {} after {:?}",
            name,
            self.experiment_id,
            if result.success { "finished" } else { "failed" },
            result.duration
        );
        Ok(result)
    }

    fn run_step(
        &mut self,
        step: &WorkflowStepConfig,
        engine: &mut dyn ExecutionEngine,
        monitor: &ExecutionMonitor,
        sink: &mut dyn StatusSink,
        options: &WorkflowOptions,
    ) -> Result<StepStatus> {
        match self.submit_step(step, engine, monitor, sink, options) {
            Ok(outcome) => Ok(status_of(&outcome)),
            Err(e) if e.is_infrastructure() => Err(e),
            Err(e) => {
                tracing::error!("Step '{}' failed: {}", step.name, e);
                Ok(StepStatus::Failed {
                    message: e.to_string(),
                })
            }
        }
    }

    fn submit_step(
        &mut self,
        step: &WorkflowStepConfig,
        engine: &mut dyn ExecutionEngine,
        monitor: &ExecutionMonitor,
        sink: &mut dyn StatusSink,
        options: &WorkflowOptions,
    ) -> Result<SubmitOutcome> {
        let mut driver = Driver::new(&mut *self.ctx, self.experiment_id, &step.name)?;
        driver.plan(&PlanOptions {
            parameters: step.parameters.clone(),
            keep_output: options.keep_output,
            backup: false,
        })?;
        driver.submit(engine, monitor, sink, true)
    }
}

fn status_of(outcome: &SubmitOutcome) -> StepStatus {
    let submission_id = outcome.submission.id;
    if !outcome.failed_jobs.is_empty() {
        return StepStatus::JobsFailed {
            submission_id,
            failed: outcome.failed_jobs.clone(),
        };
    }
    match (&outcome.collected, outcome.snapshot.state) {
        (_, TaskState::Stopped) => StepStatus::Stopped { submission_id },
        (Some(summary), _) => StepStatus::Collected {
            submission_id,
            summary: *summary,
        },
        (None, state) => StepStatus::Failed {
            message: format!("submission {} finished as {}", submission_id, state),
        },
    }
}
