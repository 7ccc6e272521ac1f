//! Execution engine boundary.
//!
//! An engine accepts a [`TaskTree`], assigns it a persistent id once the
//! tree is durably stored, and advances scheduling each time
//! [`ExecutionEngine::progress`] is called. Two engines ship with the crate:
//!
//! - [`LocalEngine`] - session files on disk, jobs run by a [`JobRunner`]
//! - [`ScriptedEngine`] - deterministic simulation for tests

mod local;
mod runner;
mod scripted;
mod tree;

pub use local::LocalEngine;
pub use runner::{run_job_from_batch, CommandRunner, InProcessRunner, JobRunner};
pub use scripted::ScriptedEngine;
pub use tree::{NodeKind, TaskNode, TaskState, TaskTree};

use std::fmt;

use crate::error::Result;

/// Engine-local reference to a stored task tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(pub usize);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Operations the orchestration core needs from an engine.
///
/// Every method may fail with `EngineCommunication`.
pub trait ExecutionEngine {
    /// Hand a tree to the engine.
    fn store(&mut self, tree: TaskTree) -> Result<TaskHandle>;

    /// Persistent id of a stored tree, once the engine has flushed it.
    fn persistent_id(&self, handle: TaskHandle) -> Result<Option<String>>;

    /// Look up a previously stored tree by its persistent id.
    fn load(&mut self, persistent_id: &str) -> Result<TaskHandle>;

    /// Schedule the tree, re-running jobs from `start_index` on.
    fn submit(&mut self, handle: TaskHandle, start_index: u32) -> Result<()>;

    /// Advance scheduling of every submitted tree.
    fn progress(&mut self) -> Result<()>;

    /// Current state of a tree.
    fn tree(&self, handle: TaskHandle) -> Result<TaskTree>;

    /// Stop every unfinished job of a tree.
    fn stop(&mut self, handle: TaskHandle) -> Result<()>;
}
