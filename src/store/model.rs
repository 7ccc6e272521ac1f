//! Records kept by the job store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::structure::ExperimentId;
use crate::submission::SubmissionPhase;

/// One registered execution of a step for an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Unique, increasing in creation order.
    pub id: u64,
    pub experiment_id: ExperimentId,
    /// Step name.
    pub program: String,
    /// Persistent id of the engine's task tree, set once on attach.
    #[serde(default)]
    pub top_task_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub phase: SubmissionPhase,
}

/// Observed status of a run job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Submitted,
    Running,
    TerminatedOk,
    TerminatedFailed,
    Stopped,
}

impl JobStatus {
    /// Terminated or stopped.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::TerminatedOk | Self::TerminatedFailed | Self::Stopped
        )
    }

    pub fn is_failed(self) -> bool {
        self == Self::TerminatedFailed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::TerminatedOk => "TERMINATED_OK",
            Self::TerminatedFailed => "TERMINATED_FAILED",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last known status of one run job of a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: u32,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// A domain record merged by a collect phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub kind: String,
    pub natural_key: String,
    pub value: serde_json::Value,
}

/// What a get-or-create upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}
