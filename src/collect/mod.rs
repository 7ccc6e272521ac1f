//! Collect coordinator.
//!
//! The collect phase is the single reduce job of a submission. It runs only
//! when every run job terminated successfully, and it merges run outputs
//! through get-or-create upserts, so running it again on unchanged outputs
//! changes nothing. It is never retried automatically: a failed collect
//! leaves the submission in `COLLECT_FAILED` for manual diagnosis.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PlateflowError, Result};
use crate::plan::CollectDescription;
use crate::steps::{JobContext, RecordSink, StepDefinition};
use crate::store::{JobRecord, JobStatus, JobStore, UpsertOutcome};
use crate::submission::{SubmissionManager, SubmissionPhase};

/// Counts of upsert outcomes of one collect run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CollectSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl CollectSummary {
    pub fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged
    }
}

impl fmt::Display for CollectSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} unchanged",
            self.created, self.updated, self.unchanged
        )
    }
}

/// Record sink writing through the job store.
pub struct StoreSink<'a> {
    store: &'a mut dyn JobStore,
    summary: CollectSummary,
}

impl<'a> StoreSink<'a> {
    pub fn new(store: &'a mut dyn JobStore) -> Self {
        Self {
            store,
            summary: CollectSummary::default(),
        }
    }

    pub fn summary(&self) -> CollectSummary {
        self.summary
    }
}

impl RecordSink for StoreSink<'_> {
    fn upsert(&mut self, kind: &str, natural_key: &str, value: Value) -> Result<UpsertOutcome> {
        let outcome = self.store.upsert_record(kind, natural_key, value)?;
        self.summary.record(outcome);
        Ok(outcome)
    }
}

/// Statuses of every planned run job; jobs without a recorded status
/// count as `CREATED`.
pub fn expected_statuses(
    run_ids: &[u32],
    recorded: &BTreeMap<u32, JobRecord>,
) -> BTreeMap<u32, JobStatus> {
    run_ids
        .iter()
        .map(|id| {
            let status = recorded.get(id).map_or(JobStatus::Created, |r| r.status);
            (*id, status)
        })
        .collect()
}

/// Refuse to collect unless every run job terminated successfully.
pub fn check_gate(statuses: &BTreeMap<u32, JobStatus>) -> Result<()> {
    let mut failed = Vec::new();
    let mut pending = Vec::new();
    for (&id, &status) in statuses {
        match status {
            JobStatus::TerminatedOk => {}
            JobStatus::TerminatedFailed => failed.push(id),
            _ => pending.push(id),
        }
    }
    if failed.is_empty() && pending.is_empty() {
        Ok(())
    } else {
        Err(PlateflowError::CollectGated { failed, pending })
    }
}

/// Gates and runs the collect phase of a submission.
pub struct CollectCoordinator<'a> {
    store: &'a mut dyn JobStore,
    force: bool,
}

impl<'a> CollectCoordinator<'a> {
    pub fn new(store: &'a mut dyn JobStore) -> Self {
        Self {
            store,
            force: false,
        }
    }

    /// Allow collecting a submission whose previous collect failed.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Run the step's collect routine for `submission_id`.
    ///
    /// `statuses` must hold every planned run job. A submission that was
    /// already collected can be collected again; its records are merged
    /// idempotently.
    pub fn invoke(
        &mut self,
        submission_id: u64,
        step: &dyn StepDefinition,
        collect: &CollectDescription,
        ctx: &JobContext,
        statuses: &BTreeMap<u32, JobStatus>,
    ) -> Result<CollectSummary> {
        check_gate(statuses)?;
        let phase = self.prepare(submission_id)?;

        tracing::info!(
            "Collecting outputs of {} job(s) for submission {}",
            statuses.len(),
            submission_id
        );
        self.store.begin_records()?;
        let mut sink = StoreSink::new(&mut *self.store);
        let outcome = step.collect_job_output(collect, ctx, &mut sink);
        let summary = sink.summary();
        let committed = self.store.commit_records();

        match outcome.and(committed) {
            Ok(()) => {
                if phase != SubmissionPhase::Collected {
                    SubmissionManager::new(&mut *self.store)
                        .advance(submission_id, SubmissionPhase::Collected)?;
                }
                tracing::info!("Collect of submission {} merged: {}", submission_id, summary);
                Ok(summary)
            }
            Err(e) => {
                tracing::error!("Collect of submission {} failed: {}", submission_id, e);
                if let Err(store_err) = SubmissionManager::new(&mut *self.store)
                    .advance(submission_id, SubmissionPhase::CollectFailed)
                {
                    tracing::warn!(
                        "Could not mark submission {} as failed: {}",
                        submission_id,
                        store_err
                    );
                }
                Err(PlateflowError::CollectFailed {
                    submission_id,
                    message: e.to_string(),
                })
            }
        }
    }

    /// Move the submission to `CollectEligible` and return its phase.
    fn prepare(&mut self, submission_id: u64) -> Result<SubmissionPhase> {
        let submission = self
            .store
            .submission(submission_id)?
            .ok_or_else(|| PlateflowError::NotFound {
                what: format!("submission {}", submission_id),
            })?;

        match submission.phase {
            SubmissionPhase::Collected | SubmissionPhase::CollectEligible => Ok(submission.phase),
            SubmissionPhase::CollectFailed if self.force => {
                let mut reopened = submission.clone();
                reopened.phase = SubmissionPhase::CollectEligible;
                self.store.update_submission(&reopened)?;
                tracing::warn!("Collecting submission {} again after a failure", submission_id);
                Ok(SubmissionPhase::CollectEligible)
            }
            SubmissionPhase::CollectFailed => Err(PlateflowError::Precondition {
                message: format!(
                    "collect of submission {} failed before; inspect the store and retry with --force",
                    submission_id
                ),
            }),
            _ => SubmissionManager::new(&mut *self.store)
                .advance(submission_id, SubmissionPhase::CollectEligible)
                .map(|s| s.phase),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TaskTree;
    use crate::error::PlateflowError;
    use crate::plan::{JobDescription, StepPlan};
    use crate::store::MemoryStore;
    use crate::structure::{ExperimentId, StructuralSnapshot};
    use serde_json::json;
    use std::path::PathBuf;

    /// Upserts one record per collect input; fails on demand.
    struct MergeStep {
        fail: bool,
    }

    impl StepDefinition for MergeStep {
        fn name(&self) -> &str {
            "merge"
        }
        fn description(&self) -> &str {
            "test"
        }
        fn parameter_schema(&self) -> Value {
            Value::Null
        }
        fn validate(&self, _: &Value) -> Result<()> {
            Ok(())
        }
        fn plan(&self, _: &Value, _: &StructuralSnapshot) -> Result<StepPlan> {
            Ok(StepPlan::default())
        }
        fn run_job(&self, _: &JobDescription, _: &JobContext) -> Result<()> {
            Ok(())
        }
        fn collect_job_output(
            &self,
            collect: &CollectDescription,
            _: &JobContext,
            sink: &mut dyn RecordSink,
        ) -> Result<()> {
            for path in collect.inputs.get("files").into_iter().flatten() {
                sink.upsert("file", path, json!({"path": path}))?;
            }
            if self.fail {
                return Err(PlateflowError::from(anyhow::anyhow!("disk full")));
            }
            Ok(())
        }
    }

    fn ctx() -> JobContext {
        JobContext {
            experiment_id: ExperimentId(1),
            experiment_dir: PathBuf::from("/tmp/exp"),
        }
    }

    fn description() -> CollectDescription {
        let mut collect = CollectDescription::default();
        collect
            .inputs
            .insert("files".into(), vec!["a".into(), "b".into(), "c".into()]);
        collect
    }

    fn ok_statuses(n: u32) -> BTreeMap<u32, JobStatus> {
        (1..=n).map(|id| (id, JobStatus::TerminatedOk)).collect()
    }

    /// A submission that went through a successful run phase.
    fn terminated_submission(store: &mut dyn JobStore) -> u64 {
        let mut manager = SubmissionManager::new(store);
        let s = manager.register(ExperimentId(1), "merge").unwrap();
        let mut tree = TaskTree::new(ExperimentId(1), "merge", &[1, 2, 3], None);
        tree.persistent_id = Some("t".into());
        manager.attach(s.id, &tree).unwrap();
        manager.advance(s.id, SubmissionPhase::Terminated).unwrap();
        s.id
    }

    #[test]
    fn gate_lists_failed_and_pending_jobs() {
        let mut statuses = ok_statuses(5);
        statuses.insert(2, JobStatus::TerminatedFailed);
        statuses.insert(4, JobStatus::Running);
        statuses.insert(5, JobStatus::Stopped);

        let err = check_gate(&statuses).unwrap_err();

        match err {
            PlateflowError::CollectGated { failed, pending } => {
                assert_eq!(failed, vec![2]);
                assert_eq!(pending, vec![4, 5]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_statuses_count_as_created() {
        let statuses = expected_statuses(&[1, 2], &BTreeMap::new());
        assert_eq!(statuses[&2], JobStatus::Created);
        assert!(check_gate(&statuses).is_err());
    }

    #[test]
    fn gated_collect_never_calls_the_step() {
        let mut store = MemoryStore::new();
        let id = terminated_submission(&mut store);
        let mut statuses = ok_statuses(3);
        statuses.insert(2, JobStatus::TerminatedFailed);

        let err = CollectCoordinator::new(&mut store)
            .invoke(id, &MergeStep { fail: false }, &description(), &ctx(), &statuses)
            .unwrap_err();

        assert!(matches!(err, PlateflowError::CollectGated { .. }));
        assert!(store.records("file").unwrap().is_empty());
        assert_eq!(
            store.submission(id).unwrap().unwrap().phase,
            SubmissionPhase::Terminated
        );
    }

    #[test]
    fn second_invoke_merges_nothing_new() {
        let mut store = MemoryStore::new();
        let id = terminated_submission(&mut store);
        let step = MergeStep { fail: false };

        let first = CollectCoordinator::new(&mut store)
            .invoke(id, &step, &description(), &ctx(), &ok_statuses(3))
            .unwrap();
        let count = store.records("file").unwrap().len();
        let second = CollectCoordinator::new(&mut store)
            .invoke(id, &step, &description(), &ctx(), &ok_statuses(3))
            .unwrap();

        assert_eq!(first.created, 3);
        assert_eq!(second.created, 0);
        assert_eq!(second.unchanged, 3);
        assert_eq!(store.records("file").unwrap().len(), count);
        assert_eq!(
            store.submission(id).unwrap().unwrap().phase,
            SubmissionPhase::Collected
        );
    }

    #[test]
    fn failing_collect_marks_submission() {
        let mut store = MemoryStore::new();
        let id = terminated_submission(&mut store);

        let err = CollectCoordinator::new(&mut store)
            .invoke(id, &MergeStep { fail: true }, &description(), &ctx(), &ok_statuses(3))
            .unwrap_err();

        assert!(matches!(err, PlateflowError::CollectFailed { submission_id, .. } if submission_id == id));
        assert_eq!(
            store.submission(id).unwrap().unwrap().phase,
            SubmissionPhase::CollectFailed
        );
        // partial merges stay visible
        assert_eq!(store.records("file").unwrap().len(), 3);

        let err = CollectCoordinator::new(&mut store)
            .invoke(id, &MergeStep { fail: false }, &description(), &ctx(), &ok_statuses(3))
            .unwrap_err();
        assert!(matches!(err, PlateflowError::Precondition { .. }));

        CollectCoordinator::new(&mut store)
            .force(true)
            .invoke(id, &MergeStep { fail: false }, &description(), &ctx(), &ok_statuses(3))
            .unwrap();
        assert_eq!(
            store.submission(id).unwrap().unwrap().phase,
            SubmissionPhase::Collected
        );
    }

    #[test]
    fn file_store_collect_commits_records_with_phase() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("store.yml");
        let mut store = crate::store::FileStore::open(&path).unwrap();
        let id = terminated_submission(&mut store);

        let summary = CollectCoordinator::new(&mut store)
            .invoke(id, &MergeStep { fail: false }, &description(), &ctx(), &ok_statuses(3))
            .unwrap();

        assert_eq!(summary.created, 3);
        let reopened = crate::store::FileStore::open(&path).unwrap();
        assert_eq!(reopened.records("file").unwrap().len(), 3);
        assert_eq!(
            reopened.submission(id).unwrap().unwrap().phase,
            SubmissionPhase::Collected
        );
        assert!(!temp.path().join("store.yml.lock").exists());
    }

    #[test]
    fn collect_before_termination_is_rejected() {
        let mut store = MemoryStore::new();
        let s = SubmissionManager::new(&mut store)
            .register(ExperimentId(1), "merge")
            .unwrap();

        let err = CollectCoordinator::new(&mut store)
            .invoke(s.id, &MergeStep { fail: false }, &description(), &ctx(), &ok_statuses(3))
            .unwrap_err();

        assert!(matches!(err, PlateflowError::Precondition { .. }));
    }
}
