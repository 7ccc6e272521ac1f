//! Workflow step definitions.
//!
//! A step knows how to split an experiment into run jobs, how to execute
//! one run job, and how to merge run outputs in its collect job. Steps are
//! looked up by name in a [`StepRegistry`].
//!
//! - [`metaconfig`] - one job per acquisition, lays out sites on a grid
//! - [`imextract`] - image files in batches of `batch_size`
//! - [`corilla`] - one job per acquisition and channel
//!
//! # Example
//!
//! ```
//! use plateflow::steps::StepRegistry;
//!
//! let registry = StepRegistry::with_builtins();
//! let step = registry.get("imextract").unwrap();
//! assert!(step.validate(&serde_json::json!({"batch_size": 10})).is_ok());
//! ```

pub mod corilla;
pub mod imextract;
pub mod metaconfig;
mod registry;

pub use registry::StepRegistry;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PlateflowError, Result};
use crate::plan::{CollectDescription, JobDescription, StepPlan};
use crate::store::UpsertOutcome;
use crate::structure::{ExperimentId, StructuralSnapshot};

/// Where a job runs.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub experiment_id: ExperimentId,
    pub experiment_dir: PathBuf,
}

/// Destination for the records a collect job merges.
///
/// Every write is a get-or-create keyed by `(kind, natural_key)`, so
/// merging the same outputs twice leaves the store unchanged.
pub trait RecordSink {
    fn upsert(&mut self, kind: &str, natural_key: &str, value: Value) -> Result<UpsertOutcome>;
}

/// A pluggable workflow step.
pub trait StepDefinition: Send + Sync {
    /// Unique name, used on the command line and in batch file names.
    fn name(&self) -> &str;

    /// One-line description.
    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters.
    fn parameter_schema(&self) -> Value;

    /// Check parameters against the schema.
    fn validate(&self, parameters: &Value) -> Result<()>;

    /// Split the experiment into ordered run drafts and one collect job.
    fn plan(&self, parameters: &Value, snapshot: &StructuralSnapshot) -> Result<StepPlan>;

    /// Execute one run job. Paths in `job` are absolute.
    fn run_job(&self, job: &JobDescription, ctx: &JobContext) -> Result<()>;

    /// Merge run outputs into the store. Paths in `collect` are absolute.
    fn collect_job_output(
        &self,
        collect: &CollectDescription,
        ctx: &JobContext,
        sink: &mut dyn RecordSink,
    ) -> Result<()>;

    /// Whether a plan with zero run jobs is acceptable.
    fn allows_empty_plan(&self) -> bool {
        true
    }
}

/// Deserialize step parameters, mapping failures to a validation error.
///
/// A null document is treated as an empty object so that every field
/// falls back to its default.
pub fn parse_parameters<T: DeserializeOwned>(step: &str, parameters: &Value) -> Result<T> {
    let parameters = match parameters {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(parameters).map_err(|e| PlateflowError::validation(step, e.to_string()))
}

/// JSON schema of a parameter type.
pub fn schema_of<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// Write a JSON manifest, creating parent directories.
pub fn write_manifest<T: Serialize>(path: &Path, manifest: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_vec_pretty(manifest)
        .map_err(|e| anyhow::anyhow!("Failed to serialize manifest: {}", e))?;
    fs::write(path, content)?;
    Ok(())
}

/// Read a JSON manifest written by a run job.
pub fn read_manifest<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PlateflowError::NotFound {
                what: format!("run output {}", path.display()),
            }
        } else {
            PlateflowError::Io(e)
        }
    })?;
    serde_json::from_slice(&content).map_err(|e| {
        PlateflowError::from(anyhow::anyhow!(
            "Malformed run output {}: {}",
            path.display(),
            e
        ))
    })
}

/// The single path of a one-element output group.
pub(crate) fn single_output<'a>(
    step: &str,
    paths: Option<&'a Vec<String>>,
    group: &str,
) -> Result<&'a str> {
    match paths.map(Vec::as_slice) {
        Some([only]) => Ok(only.as_str()),
        _ => Err(PlateflowError::validation(
            step,
            format!("job must have exactly one '{}' output", group),
        )),
    }
}
