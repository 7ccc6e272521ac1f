//! Batch planning.
//!
//! - [`description`] - run/collect job descriptions and the [`Batches`] plan
//! - [`planner`] - [`BatchPlanner`] assigns job ids and enforces the empty-work policy
//! - [`batch_files`] - persistence of a plan under `workflow/<step>/batches/`

pub mod batch_files;
pub mod description;
pub mod planner;

pub use batch_files::{backup_step, BatchFiles};
pub use description::{
    absolute_paths, Batches, CollectDescription, JobDescription, JobDraft, PathMap, StepPlan,
};
pub use planner::{chunk, BatchPlanner, MAX_RUN_JOBS};
