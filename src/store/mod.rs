//! Persistent job store.
//!
//! Holds submissions, their phases, the last known status of every run job
//! and the domain records merged by collect phases. Two implementations:
//!
//! - [`FileStore`] - YAML file shared through a lock file, written atomically
//! - [`MemoryStore`] - in-process, can be switched unavailable for tests

mod file;
mod memory;
mod model;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use model::{DomainRecord, JobRecord, JobStatus, Submission, UpsertOutcome};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PlateflowError, Result};
use crate::structure::ExperimentId;

/// Storage operations the submission manager, driver and collect
/// coordinator rely on.
pub trait JobStore {
    /// Allocate the next submission id and persist a new submission.
    fn create_submission(
        &mut self,
        experiment_id: ExperimentId,
        program: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Submission>;

    fn submission(&self, id: u64) -> Result<Option<Submission>>;

    /// Submissions of an experiment and step, ascending by id.
    fn submissions(&self, experiment_id: ExperimentId, program: &str) -> Result<Vec<Submission>>;

    /// Replace a stored submission.
    fn update_submission(&mut self, submission: &Submission) -> Result<()>;

    /// Last known status per run job.
    fn job_statuses(&self, submission_id: u64) -> Result<BTreeMap<u32, JobRecord>>;

    /// Overwrite the status of the given jobs.
    fn put_job_statuses(&mut self, submission_id: u64, records: &[JobRecord]) -> Result<()>;

    /// Get-or-create keyed by `(kind, natural_key)`.
    fn upsert_record(
        &mut self,
        kind: &str,
        natural_key: &str,
        value: serde_json::Value,
    ) -> Result<UpsertOutcome>;

    fn record(&self, kind: &str, natural_key: &str) -> Result<Option<serde_json::Value>>;

    /// All records of a kind, ordered by natural key.
    fn records(&self, kind: &str) -> Result<Vec<DomainRecord>>;

    /// Hold the following changes until [`JobStore::commit_records`] so a
    /// collect run persists its records in one write.
    fn begin_records(&mut self) -> Result<()> {
        Ok(())
    }

    /// Persist changes held since [`JobStore::begin_records`].
    fn commit_records(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Serialized form shared by both stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoreData {
    pub version: u32,
    pub next_submission_id: u64,
    #[serde(default)]
    pub submissions: BTreeMap<u64, Submission>,
    #[serde(default)]
    pub job_statuses: BTreeMap<u64, BTreeMap<u32, JobRecord>>,
    #[serde(default)]
    pub records: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl StoreData {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            next_submission_id: 1,
            ..Default::default()
        }
    }

    pub fn create_submission(
        &mut self,
        experiment_id: ExperimentId,
        program: &str,
        created_at: DateTime<Utc>,
    ) -> Submission {
        let id = self.next_submission_id.max(1);
        self.next_submission_id = id + 1;
        let submission = Submission {
            id,
            experiment_id,
            program: program.to_string(),
            top_task_id: None,
            created_at,
            phase: Default::default(),
        };
        self.submissions.insert(id, submission.clone());
        submission
    }

    pub fn submissions(&self, experiment_id: ExperimentId, program: &str) -> Vec<Submission> {
        self.submissions
            .values()
            .filter(|s| s.experiment_id == experiment_id && s.program == program)
            .cloned()
            .collect()
    }

    pub fn update_submission(&mut self, submission: &Submission) -> Result<()> {
        match self.submissions.get_mut(&submission.id) {
            Some(stored) => {
                *stored = submission.clone();
                Ok(())
            }
            None => Err(PlateflowError::NotFound {
                what: format!("submission {}", submission.id),
            }),
        }
    }

    pub fn put_job_statuses(&mut self, submission_id: u64, records: &[JobRecord]) {
        let jobs = self.job_statuses.entry(submission_id).or_default();
        for record in records {
            jobs.insert(record.job_id, record.clone());
        }
    }

    pub fn upsert_record(
        &mut self,
        kind: &str,
        natural_key: &str,
        value: serde_json::Value,
    ) -> UpsertOutcome {
        let records = self.records.entry(kind.to_string()).or_default();
        match records.get(natural_key) {
            None => {
                records.insert(natural_key.to_string(), value);
                UpsertOutcome::Created
            }
            Some(existing) if *existing == value => UpsertOutcome::Unchanged,
            Some(_) => {
                records.insert(natural_key.to_string(), value);
                UpsertOutcome::Updated
            }
        }
    }

    pub fn records(&self, kind: &str) -> Vec<DomainRecord> {
        self.records
            .get(kind)
            .map(|records| {
                records
                    .iter()
                    .map(|(key, value)| DomainRecord {
                        kind: kind.to_string(),
                        natural_key: key.clone(),
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn submission_ids_are_monotonic() {
        let mut data = StoreData::new();
        let a = data.create_submission(ExperimentId(1), "imextract", Utc::now());
        let b = data.create_submission(ExperimentId(2), "imextract", Utc::now());
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[test]
    fn upsert_reports_outcome() {
        let mut data = StoreData::new();
        assert_eq!(
            data.upsert_record("well", "p/A01", json!({"name": "A01"})),
            UpsertOutcome::Created
        );
        assert_eq!(
            data.upsert_record("well", "p/A01", json!({"name": "A01"})),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            data.upsert_record("well", "p/A01", json!({"name": "A1"})),
            UpsertOutcome::Updated
        );
        assert_eq!(data.records("well").len(), 1);
    }

    #[test]
    fn updating_unknown_submission_fails() {
        let mut data = StoreData::new();
        let mut other = StoreData::new();
        let s = other.create_submission(ExperimentId(1), "x", Utc::now());
        assert!(matches!(
            data.update_submission(&s),
            Err(PlateflowError::NotFound { .. })
        ));
    }

    #[test]
    fn job_statuses_overwrite_per_job() {
        let mut data = StoreData::new();
        data.put_job_statuses(
            1,
            &[
                JobRecord {
                    job_id: 1,
                    status: JobStatus::Running,
                    exit_code: None,
                },
                JobRecord {
                    job_id: 2,
                    status: JobStatus::Submitted,
                    exit_code: None,
                },
            ],
        );
        data.put_job_statuses(
            1,
            &[JobRecord {
                job_id: 1,
                status: JobStatus::TerminatedOk,
                exit_code: Some(0),
            }],
        );
        let jobs = &data.job_statuses[&1];
        assert_eq!(jobs[&1].status, JobStatus::TerminatedOk);
        assert_eq!(jobs[&2].status, JobStatus::Submitted);
    }
}
