//! Turning a step, its parameters and a snapshot into a numbered plan.

use serde_json::Value;

use super::description::{Batches, JobDescription};
use crate::error::{PlateflowError, Result};
use crate::steps::StepDefinition;
use crate::structure::StructuralSnapshot;

/// Run batch files carry a six digit job number.
pub const MAX_RUN_JOBS: usize = 999_999;

/// Computes [`Batches`] for a step.
///
/// Planning is pure: it reads the snapshot and the step, and touches
/// neither the job store nor the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct BatchPlanner;

impl BatchPlanner {
    pub fn new() -> Self {
        Self
    }

    /// Plan `step` over `snapshot`.
    ///
    /// # Errors
    ///
    /// - `Validation` if the parameters do not fit the step's schema
    /// - `EmptyWork` if the step produced no run jobs and does not allow that
    pub fn plan(
        &self,
        step: &dyn StepDefinition,
        parameters: &Value,
        snapshot: &StructuralSnapshot,
    ) -> Result<Batches> {
        step.validate(parameters)?;
        let step_plan = step.plan(parameters, snapshot)?;

        if step_plan.run.is_empty() && !step.allows_empty_plan() {
            return Err(PlateflowError::EmptyWork {
                step: step.name().to_string(),
            });
        }
        if step_plan.run.len() > MAX_RUN_JOBS {
            return Err(PlateflowError::validation(
                step.name(),
                format!(
                    "plan has {} run jobs, at most {} are supported",
                    step_plan.run.len(),
                    MAX_RUN_JOBS
                ),
            ));
        }

        let run: Vec<JobDescription> = step_plan
            .run
            .into_iter()
            .zip(1u32..)
            .map(|(draft, id)| JobDescription::from_draft(id, draft))
            .collect();

        tracing::debug!(
            "Planned {} run job(s) for step '{}' of experiment {}",
            run.len(),
            step.name(),
            snapshot.experiment_id
        );

        Ok(Batches {
            step: step.name().to_string(),
            experiment_id: snapshot.experiment_id,
            snapshot_fingerprint: snapshot.fingerprint(),
            run,
            collect: step_plan.collect,
        })
    }
}

/// Split `items` into consecutive batches of at most `n` (at least 1).
///
/// The last batch holds the remainder.
pub fn chunk<T: Clone>(items: &[T], n: usize) -> Vec<Vec<T>> {
    items.chunks(n.max(1)).map(|c| c.to_vec()).collect()
}
