use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::{DomainRecord, JobRecord, JobStore, StoreData, Submission, UpsertOutcome};
use crate::error::{PlateflowError, Result};
use crate::structure::ExperimentId;

/// In-process job store.
///
/// Can be switched unavailable to exercise the store-outage paths.
#[derive(Debug)]
pub struct MemoryStore {
    data: StoreData,
    available: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: StoreData::new(),
            available: true,
        }
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    fn check(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(PlateflowError::store("memory store switched unavailable"))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for MemoryStore {
    fn create_submission(
        &mut self,
        experiment_id: ExperimentId,
        program: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Submission> {
        self.check()?;
        Ok(self
            .data
            .create_submission(experiment_id, program, created_at))
    }

    fn submission(&self, id: u64) -> Result<Option<Submission>> {
        self.check()?;
        Ok(self.data.submissions.get(&id).cloned())
    }

    fn submissions(&self, experiment_id: ExperimentId, program: &str) -> Result<Vec<Submission>> {
        self.check()?;
        Ok(self.data.submissions(experiment_id, program))
    }

    fn update_submission(&mut self, submission: &Submission) -> Result<()> {
        self.check()?;
        self.data.update_submission(submission)
    }

    fn job_statuses(&self, submission_id: u64) -> Result<BTreeMap<u32, JobRecord>> {
        self.check()?;
        Ok(self
            .data
            .job_statuses
            .get(&submission_id)
            .cloned()
            .unwrap_or_default())
    }

    fn put_job_statuses(&mut self, submission_id: u64, records: &[JobRecord]) -> Result<()> {
        self.check()?;
        self.data.put_job_statuses(submission_id, records);
        Ok(())
    }

    fn upsert_record(
        &mut self,
        kind: &str,
        natural_key: &str,
        value: serde_json::Value,
    ) -> Result<UpsertOutcome> {
        self.check()?;
        Ok(self.data.upsert_record(kind, natural_key, value))
    }

    fn record(&self, kind: &str, natural_key: &str) -> Result<Option<serde_json::Value>> {
        self.check()?;
        Ok(self
            .data
            .records
            .get(kind)
            .and_then(|r| r.get(natural_key))
            .cloned())
    }

    fn records(&self, kind: &str) -> Result<Vec<DomainRecord>> {
        self.check()?;
        Ok(self.data.records(kind))
    }
}
