//! CLI argument definitions.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::structure::ExperimentId;

/// plateflow - plan, submit, monitor and collect image-processing steps.
#[derive(Debug, Parser)]
#[command(name = "plateflow")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Workspace root holding the experiments (defaults to the current directory)
    #[arg(short, long, global = true, env = "PLATEFLOW_ROOT")]
    pub root: Option<PathBuf>,

    /// Config file to use instead of .plateflow/config.yml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Show every status snapshot while monitoring
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show final results
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Split a step into run jobs and write their batch files
    Plan(PlanArgs),

    /// Execute one run job of a planned step
    Run(RunArgs),

    /// Submit a planned step and monitor it until it finishes
    Submit(SubmitArgs),

    /// Re-run jobs of the latest submission
    Resubmit(ResubmitArgs),

    /// Merge run outputs of the latest submission into the store
    Collect(CollectArgs),

    /// Show the task tree of the latest submission
    Status(StatusArgs),

    /// Stop the latest submission
    Stop(StopArgs),

    /// Run the stages of a workflow for an experiment
    Workflow(WorkflowArgs),

    /// Show the description of a planned job
    Info(InfoArgs),

    /// Print the log of a job
    Log(LogArgs),

    /// Delete outputs, batches, sessions and logs of a step
    Cleanup(CleanupArgs),

    /// List registered steps
    Steps(StepsArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// The experiment and step a command works on.
#[derive(Debug, Clone, clap::Args)]
pub struct StepTarget {
    /// Experiment id
    pub experiment: ExperimentId,

    /// Step name (see `plateflow steps`)
    pub step: String,
}

/// Polling settings; unset values come from the `monitoring` config.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct MonitorArgs {
    /// Seconds between status pulls (negative values count as 0)
    #[arg(long, allow_negative_numbers = true)]
    pub interval: Option<i64>,

    /// Tree levels included in each status pull (negative values count as 0)
    #[arg(long, allow_negative_numbers = true)]
    pub depth: Option<i64>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub target: StepTarget,

    /// Step parameter, repeatable (values are parsed as JSON, else taken as text)
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Keep outputs of the previous plan
    #[arg(long)]
    pub keep_output: bool,

    /// Move previous batches and logs into a backup directory
    #[arg(long)]
    pub backup: bool,
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: StepTarget,

    /// Run job id
    pub job: u32,
}

#[derive(Debug, Clone, clap::Args)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub target: StepTarget,

    #[command(flatten)]
    pub monitor: MonitorArgs,

    /// Collect right away when every job succeeded
    #[arg(long)]
    pub collect: bool,
}

#[derive(Debug, Clone, clap::Args)]
pub struct ResubmitArgs {
    #[command(flatten)]
    pub target: StepTarget,

    /// First job id to run again (defaults to the first job that did not succeed)
    #[arg(long)]
    pub index: Option<u32>,

    #[command(flatten)]
    pub monitor: MonitorArgs,

    /// Collect right away when every job succeeded
    #[arg(long)]
    pub collect: bool,
}

#[derive(Debug, Clone, clap::Args)]
pub struct CollectArgs {
    #[command(flatten)]
    pub target: StepTarget,

    /// Collect again after a failed collect
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Clone, clap::Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: StepTarget,

    /// Tree levels to show (defaults to the `monitoring.depth` config)
    #[arg(long, allow_negative_numbers = true)]
    pub depth: Option<i64>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, clap::Args)]
pub struct StopArgs {
    #[command(flatten)]
    pub target: StepTarget,
}

#[derive(Debug, Clone, clap::Args)]
pub struct WorkflowArgs {
    /// Experiment id
    pub experiment: ExperimentId,

    /// Workflow name from the `workflows` config
    #[arg(default_value = "canonical")]
    pub name: String,

    /// Read the workflow from this YAML file instead of the config
    #[arg(long, value_name = "PATH", conflicts_with = "name")]
    pub file: Option<PathBuf>,

    /// Start at this stage
    #[arg(long, value_name = "STAGE")]
    pub from: Option<String>,

    /// Keep outputs of previous plans
    #[arg(long)]
    pub keep_output: bool,

    #[command(flatten)]
    pub monitor: MonitorArgs,
}

#[derive(Debug, Clone, clap::Args)]
pub struct InfoArgs {
    #[command(flatten)]
    pub target: StepTarget,

    /// Run job id (defaults to the collect job)
    #[arg(long)]
    pub job: Option<u32>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct LogArgs {
    #[command(flatten)]
    pub target: StepTarget,

    /// Run job id (defaults to the collect job)
    #[arg(long)]
    pub job: Option<u32>,

    /// Print standard error instead of standard output
    #[arg(long)]
    pub stderr: bool,
}

#[derive(Debug, Clone, clap::Args)]
pub struct CleanupArgs {
    #[command(flatten)]
    pub target: StepTarget,

    /// Do not ask for confirmation
    #[arg(short, long)]
    pub yes: bool,
}

#[derive(Debug, Clone, Default, clap::Args)]
pub struct StepsArgs {
    /// Show the parameter schema of one step
    pub name: Option<String>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}
