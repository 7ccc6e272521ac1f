//! Error types for plateflow operations.
//!
//! This module defines [`PlateflowError`], the primary error type used
//! throughout the crate, and a [`Result`] type alias for convenience.
//!
//! # Error Handling Strategy
//!
//! - Planning errors (`Validation`, `EmptyWork`) abort before anything is persisted
//! - Infrastructure errors (`StoreUnavailable`, `EngineCommunication`) abort the
//!   current operation and are surfaced whole to the operator
//! - Protocol misuse (`Precondition`, `NotPersisted`) signals a caller bug or a
//!   retry-later condition
//! - A failed job is *not* an error; it is a `TERMINATED_FAILED` status in the
//!   snapshot. Only when an operation cannot proceed because of failed jobs
//!   (`JobsFailed`, `CollectGated`) do job ids surface in an error.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for plateflow operations.
#[derive(Debug, Error)]
pub enum PlateflowError {
    /// Step parameters or a job description violate the step's schema.
    #[error("Invalid parameters for step '{step}': {message}")]
    Validation { step: String, message: String },

    /// The step produced no run jobs and its policy forbids that.
    #[error("Step '{step}' produced no jobs for this experiment")]
    EmptyWork { step: String },

    /// The persistent job store cannot be read or written.
    #[error("Job store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// The execution engine failed to answer a request.
    #[error("Execution engine error during {operation}: {message}")]
    EngineCommunication { operation: String, message: String },

    /// An operation was called in a state that does not allow it.
    #[error("Precondition failed: {message}")]
    Precondition { message: String },

    /// The task tree has not been durably stored by the engine yet.
    #[error("Task tree for submission {submission_id} has no persistent id yet")]
    NotPersisted { submission_id: u64 },

    /// A requested entity does not exist.
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Collect was requested while run jobs failed or are still in flight.
    #[error("Collect phase is gated: {}", describe_gate(.failed, .pending))]
    CollectGated { failed: Vec<u32>, pending: Vec<u32> },

    /// The step's reduce routine failed; merged records may be partially applied.
    #[error("Collect phase of submission {submission_id} failed: {message}")]
    CollectFailed { submission_id: u64, message: String },

    /// A submission finished with failed run jobs.
    #[error("{} job(s) failed: {}", .failed.len(), join_ids(.failed))]
    JobsFailed { failed: Vec<u32> },

    /// No step with the given name is registered.
    #[error("Unknown step: {name}")]
    UnknownStep { name: String },

    /// Batch files are missing or malformed.
    #[error("Job description error: {message}")]
    JobDescription { message: String },

    /// Configuration file not found at expected location.
    #[error("Configuration not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Failed to parse a configuration or snapshot file.
    #[error("Failed to parse {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic wrapped error for anyhow interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PlateflowError {
    /// Shorthand for a [`PlateflowError::Validation`].
    pub fn validation(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`PlateflowError::EngineCommunication`].
    pub fn engine(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EngineCommunication {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`PlateflowError::StoreUnavailable`].
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    /// Whether the error comes from the store or the engine rather than
    /// from the step being driven.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::EngineCommunication { .. }
        )
    }

    /// Job ids this error is about, if any.
    pub fn job_ids(&self) -> Vec<u32> {
        match self {
            Self::CollectGated { failed, pending } => {
                let mut ids: Vec<u32> = failed.iter().chain(pending).copied().collect();
                ids.sort_unstable();
                ids
            }
            Self::JobsFailed { failed } => failed.clone(),
            _ => Vec::new(),
        }
    }
}

fn join_ids(ids: &[u32]) -> String {
    ids.iter()
        .map(|id| format!("#{}", id))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_gate(failed: &[u32], pending: &[u32]) -> String {
    let mut parts = Vec::new();
    if !failed.is_empty() {
        parts.push(format!("failed jobs {}", join_ids(failed)));
    }
    if !pending.is_empty() {
        parts.push(format!("unfinished jobs {}", join_ids(pending)));
    }
    if parts.is_empty() {
        "no run-phase status available".to_string()
    } else {
        parts.join("; ")
    }
}

/// Result type alias for plateflow operations.
pub type Result<T> = std::result::Result<T, PlateflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_engine_errors_are_infrastructure() {
        assert!(PlateflowError::store("gone").is_infrastructure());
        assert!(PlateflowError::engine("progress", "timeout").is_infrastructure());
        assert!(!PlateflowError::JobsFailed { failed: vec![1] }.is_infrastructure());
    }

    #[test]
    fn validation_displays_step_and_message() {
        let err = PlateflowError::validation("metaconfig", "unknown variant `diagonal`");
        let msg = err.to_string();
        assert!(msg.contains("metaconfig"));
        assert!(msg.contains("diagonal"));
    }

    #[test]
    fn jobs_failed_lists_every_id() {
        let err = PlateflowError::JobsFailed { failed: vec![2, 7] };
        let msg = err.to_string();
        assert!(msg.starts_with("2 job(s) failed"));
        assert!(msg.contains("#2"));
        assert!(msg.contains("#7"));
    }

    #[test]
    fn collect_gated_names_failed_and_pending() {
        let err = PlateflowError::CollectGated {
            failed: vec![2],
            pending: vec![4, 5],
        };
        let msg = err.to_string();
        assert!(msg.contains("failed jobs #2"));
        assert!(msg.contains("unfinished jobs #4, #5"));
        assert_eq!(err.job_ids(), vec![2, 4, 5]);
    }

    #[test]
    fn not_persisted_displays_submission() {
        let err = PlateflowError::NotPersisted { submission_id: 12 };
        assert!(err.to_string().contains("12"));
    }

    #[test]
    fn io_error_converts_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: PlateflowError = io_err.into();
        assert!(matches!(err, PlateflowError::Io(_)));
    }

    #[test]
    fn other_errors_have_no_job_ids() {
        let err = PlateflowError::store("connection refused");
        assert!(err.job_ids().is_empty());
    }
}
