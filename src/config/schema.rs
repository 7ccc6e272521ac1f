//! Configuration schema for `.plateflow/config.yml`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateflowConfig {
    /// Job store location, relative to the workspace root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,

    /// Execution monitor settings.
    pub monitoring: MonitoringSettings,

    /// Local execution engine settings.
    pub engine: EngineSettings,

    /// Resources requested for every run job.
    pub resources: ResourceSettings,

    /// Default parameters per step, keyed by step name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub steps: BTreeMap<String, serde_json::Value>,

    /// Named multi-stage workflows.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub workflows: BTreeMap<String, WorkflowConfig>,
}

/// Name of the workflow available without configuration.
pub const CANONICAL_WORKFLOW: &str = "canonical";

/// Stages of a workflow, run in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub stages: Vec<StageConfig>,
}

/// How the steps of a stage relate to each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageMode {
    /// Each step needs the previous one; the first failure ends the stage.
    #[default]
    Sequential,
    /// Steps are independent; all of them run before the stage fails.
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    #[serde(default)]
    pub mode: StageMode,

    #[serde(default)]
    pub steps: Vec<WorkflowStepConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepConfig {
    /// Registered step name
    pub name: String,

    /// Inactive steps are skipped
    #[serde(default = "default_active")]
    pub active: bool,

    /// Parameters merged over the step's configured defaults
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub parameters: serde_json::Value,
}

fn default_active() -> bool {
    true
}

impl WorkflowStepConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
            parameters: serde_json::Value::Null,
        }
    }
}

impl WorkflowConfig {
    /// Image conversion followed by illumination statistics.
    pub fn canonical() -> Self {
        Self {
            description: Some("Convert images, then compute illumination statistics".into()),
            stages: vec![
                StageConfig {
                    name: "image_conversion".into(),
                    mode: StageMode::Sequential,
                    steps: vec![
                        WorkflowStepConfig::new("metaconfig"),
                        WorkflowStepConfig::new("imextract"),
                    ],
                },
                StageConfig {
                    name: "image_preprocessing".into(),
                    mode: StageMode::Parallel,
                    steps: vec![WorkflowStepConfig::new("corilla")],
                },
            ],
        }
    }
}

/// How often and how deep the monitor looks at a task tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Seconds between status pulls.
    pub interval_secs: u64,

    /// How many levels below the root are reported each iteration.
    pub depth: usize,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            depth: 1,
        }
    }
}

/// Which runner the local engine uses for run jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// Call the step's run routine inside the driver process.
    #[default]
    InProcess,
    /// Spawn `plateflow run` per job and capture its output.
    Command,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum jobs started per engine progress call.
    pub max_in_flight: usize,

    /// Runner used for run jobs.
    pub runner: RunnerKind,

    /// Program spawned by the command runner (defaults to the current executable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            runner: RunnerKind::InProcess,
            program: None,
        }
    }
}

/// Per-job resource request, recorded on each job node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    /// Wall time as `HH:MM:SS`.
    pub duration: String,
    pub memory_mb: u32,
    pub cores: u32,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            duration: "02:00:00".to_string(),
            memory_mb: 2048,
            cores: 1,
        }
    }
}

impl ResourceSettings {
    /// Check that the request is usable.
    pub fn check(&self) -> std::result::Result<(), String> {
        if self.cores == 0 {
            return Err("resources.cores must be positive".to_string());
        }
        if self.memory_mb == 0 {
            return Err("resources.memory_mb must be positive".to_string());
        }
        let parts: Vec<&str> = self.duration.split(':').collect();
        let well_formed = parts.len() == 3 && parts.iter().all(|p| p.parse::<u32>().is_ok());
        if !well_formed {
            return Err(format!(
                "resources.duration must be HH:MM:SS, got '{}'",
                self.duration
            ));
        }
        Ok(())
    }
}

impl PlateflowConfig {
    /// Default parameters configured for a step, or an empty object.
    pub fn step_defaults(&self, step: &str) -> serde_json::Value {
        self.steps
            .get(step)
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()))
    }

    /// A configured workflow, or the built-in canonical one.
    pub fn workflow(&self, name: &str) -> Option<WorkflowConfig> {
        match self.workflows.get(name) {
            Some(workflow) => Some(workflow.clone()),
            None if name == CANONICAL_WORKFLOW => Some(WorkflowConfig::canonical()),
            None => None,
        }
    }
}
