//! Submission bookkeeping.
//!
//! A submission is one tracked execution of a step against an experiment.
//! The [`SubmissionManager`] registers it, attaches the engine's task tree
//! exactly once, moves it through its [`SubmissionPhase`]s and records the
//! per-job statuses the monitor observed.

mod phase;

pub use phase::SubmissionPhase;

use chrono::Utc;

use crate::engine::TaskTree;
use crate::error::{PlateflowError, Result};
use crate::monitor::StatusNode;
use crate::store::{JobRecord, JobStore, Submission};
use crate::structure::ExperimentId;

/// Writes submissions to the job store.
pub struct SubmissionManager<'a> {
    store: &'a mut dyn JobStore,
}

impl<'a> SubmissionManager<'a> {
    pub fn new(store: &'a mut dyn JobStore) -> Self {
        Self { store }
    }

    /// Persist a new submission in phase `Created`.
    pub fn register(&mut self, experiment_id: ExperimentId, program: &str) -> Result<Submission> {
        let submission = self
            .store
            .create_submission(experiment_id, program, Utc::now())?;
        tracing::info!(
            "Registered submission {} of step {} for experiment {}",
            submission.id,
            program,
            experiment_id
        );
        Ok(submission)
    }

    /// Record the task tree's persistent id on the submission.
    ///
    /// Fails with `NotPersisted` while the engine has not stored the tree
    /// yet (retry later), and with `Precondition` once an id is set.
    pub fn attach(&mut self, submission_id: u64, tree: &TaskTree) -> Result<Submission> {
        let mut submission = self.get(submission_id)?;
        if let Some(existing) = &submission.top_task_id {
            return Err(PlateflowError::Precondition {
                message: format!(
                    "submission {} is already attached to task tree {}",
                    submission_id, existing
                ),
            });
        }
        let persistent_id = tree
            .persistent_id
            .clone()
            .ok_or(PlateflowError::NotPersisted { submission_id })?;

        check_transition(&submission, SubmissionPhase::Submitted)?;
        submission.top_task_id = Some(persistent_id);
        submission.phase = SubmissionPhase::Submitted;
        self.store.update_submission(&submission)?;
        tracing::info!(
            "Attached submission {} to task tree {}",
            submission_id,
            submission.top_task_id.as_deref().unwrap_or_default()
        );
        Ok(submission)
    }

    /// Task tree id of the most recent attached submission for the pair.
    pub fn last_submission(&self, experiment_id: ExperimentId, program: &str) -> Result<String> {
        self.latest(experiment_id, program)?
            .top_task_id
            .ok_or_else(|| not_found(experiment_id, program))
    }

    /// Most recent attached submission for the pair.
    pub fn latest(&self, experiment_id: ExperimentId, program: &str) -> Result<Submission> {
        self.store
            .submissions(experiment_id, program)?
            .into_iter()
            .rev()
            .find(|s| s.top_task_id.is_some())
            .ok_or_else(|| not_found(experiment_id, program))
    }

    /// Move a submission to `phase`. Staying in the same phase is a no-op.
    pub fn advance(&mut self, submission_id: u64, phase: SubmissionPhase) -> Result<Submission> {
        let mut submission = self.get(submission_id)?;
        if submission.phase == phase {
            return Ok(submission);
        }
        check_transition(&submission, phase)?;
        tracing::info!(
            "Submission {}: {} -> {}",
            submission_id,
            submission.phase,
            phase
        );
        submission.phase = phase;
        self.store.update_submission(&submission)?;
        Ok(submission)
    }

    /// Persist the per-job statuses contained in a snapshot.
    ///
    /// Jobs the snapshot does not resolve (because of its depth) keep
    /// their previously recorded status.
    pub fn record_statuses(
        &mut self,
        submission_id: u64,
        snapshot: &StatusNode,
    ) -> Result<Vec<JobRecord>> {
        let records = snapshot.job_records();
        if !records.is_empty() {
            self.store.put_job_statuses(submission_id, &records)?;
            tracing::debug!(
                "Recorded {} job status(es) for submission {}",
                records.len(),
                submission_id
            );
        }
        Ok(records)
    }

    fn get(&self, submission_id: u64) -> Result<Submission> {
        self.store
            .submission(submission_id)?
            .ok_or_else(|| PlateflowError::NotFound {
                what: format!("submission {}", submission_id),
            })
    }
}

fn check_transition(submission: &Submission, next: SubmissionPhase) -> Result<()> {
    if submission.phase.can_transition_to(next) {
        Ok(())
    } else {
        Err(PlateflowError::Precondition {
            message: format!(
                "submission {} cannot move from {} to {}",
                submission.id, submission.phase, next
            ),
        })
    }
}

fn not_found(experiment_id: ExperimentId, program: &str) -> PlateflowError {
    PlateflowError::NotFound {
        what: format!(
            "no submission of step '{}' for experiment {}",
            program, experiment_id
        ),
    }
}
