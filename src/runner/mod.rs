//! Step lifecycle orchestration.
//!
//! [`Driver`] ties the planner, submission manager, execution monitor and
//! collect coordinator together for one step of one experiment.
//! [`WorkflowRunner`] drives the stages of a multi-step workflow through it.

mod driver;
mod workflow;

pub use driver::{Driver, PlanOptions, SubmitOutcome};
pub use workflow::{
    StepResult, StepStatus, WorkflowOptions, WorkflowProgress, WorkflowResult, WorkflowRunner,
};
