use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};

use super::tree::{TaskState, TaskTree};
use super::{ExecutionEngine, TaskHandle};
use crate::error::{PlateflowError, Result};

/// Deterministic engine simulation.
///
/// Submitted jobs start running on the first `progress` call and all finish
/// on the `terminate_after`-th call after submission. Failing jobs exit
/// with code 1; flaky jobs fail only the first time they run.
///
/// ```
/// use plateflow::engine::{ExecutionEngine, ScriptedEngine, TaskState, TaskTree};
/// use plateflow::structure::ExperimentId;
///
/// let mut engine = ScriptedEngine::new().terminate_after(2);
/// let handle = engine.store(TaskTree::new(ExperimentId(1), "corilla", &[1, 2], None)).unwrap();
/// engine.submit(handle, 0).unwrap();
/// engine.progress().unwrap();
/// assert_eq!(engine.tree(handle).unwrap().state(), TaskState::Running);
/// engine.progress().unwrap();
/// assert_eq!(engine.tree(handle).unwrap().state(), TaskState::Terminated);
/// ```
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    terminate_after: usize,
    failing: BTreeSet<u32>,
    flaky: BTreeSet<u32>,
    defer_persistence: Option<usize>,
    stop_at: Option<usize>,
    progress_failures: BTreeSet<usize>,
    tree_failures: BTreeSet<usize>,

    trees: Vec<ScriptedTree>,
    progress_calls: usize,
    tree_calls: Cell<usize>,
    executions: BTreeMap<u32, usize>,
}

#[derive(Debug)]
struct ScriptedTree {
    tree: TaskTree,
    calls_since_submit: usize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            terminate_after: 1,
            ..Default::default()
        }
    }

    /// Number of progress calls after submission until every job finished.
    pub fn terminate_after(mut self, calls: usize) -> Self {
        self.terminate_after = calls.max(1);
        self
    }

    pub fn failing_jobs(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.failing.extend(ids);
        self
    }

    /// Jobs that fail on their first execution only.
    pub fn flaky_jobs(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.flaky.extend(ids);
        self
    }

    /// Assign persistent ids only after this many progress calls.
    pub fn defer_persistence(mut self, progress_calls: usize) -> Self {
        self.defer_persistence = Some(progress_calls);
        self
    }

    /// Simulate an external stop on the given progress call.
    pub fn stop_at(mut self, progress_call: usize) -> Self {
        self.stop_at = Some(progress_call);
        self
    }

    /// Make the given progress call (1-based) fail.
    pub fn fail_progress_call(mut self, call: usize) -> Self {
        self.progress_failures.insert(call);
        self
    }

    /// Make the given status pull (1-based) fail.
    pub fn fail_tree_call(mut self, call: usize) -> Self {
        self.tree_failures.insert(call);
        self
    }

    pub fn progress_calls(&self) -> usize {
        self.progress_calls
    }

    /// How often a job was executed.
    pub fn executions(&self, job_id: u32) -> usize {
        self.executions.get(&job_id).copied().unwrap_or(0)
    }

    /// Assign persistent ids to trees stored so far.
    pub fn flush(&mut self) {
        for (index, t) in self.trees.iter_mut().enumerate() {
            if t.tree.persistent_id.is_none() {
                t.tree.persistent_id = Some(format!("scripted-{}", index + 1));
            }
        }
    }

    fn get(&self, handle: TaskHandle) -> Result<&ScriptedTree> {
        self.trees
            .get(handle.0)
            .ok_or_else(|| PlateflowError::engine("lookup", format!("unknown handle {}", handle)))
    }

    fn finish(&mut self, index: usize) {
        let pending = self.trees[index].tree.pending_jobs();
        let running: Vec<u32> = self.trees[index]
            .tree
            .jobs()
            .filter(|n| n.state == TaskState::Running)
            .filter_map(|n| n.job_id())
            .collect();
        for job_id in pending.into_iter().chain(running) {
            let runs = self.executions.entry(job_id).or_insert(0);
            *runs += 1;
            let fails = self.failing.contains(&job_id) || (self.flaky.contains(&job_id) && *runs == 1);
            self.trees[index]
                .tree
                .finish_job(job_id, if fails { 1 } else { 0 });
        }
    }
}

impl ExecutionEngine for ScriptedEngine {
    fn store(&mut self, mut tree: TaskTree) -> Result<TaskHandle> {
        if self.defer_persistence.is_none() {
            tree.persistent_id = Some(format!("scripted-{}", self.trees.len() + 1));
        }
        self.trees.push(ScriptedTree {
            tree,
            calls_since_submit: 0,
        });
        Ok(TaskHandle(self.trees.len() - 1))
    }

    fn persistent_id(&self, handle: TaskHandle) -> Result<Option<String>> {
        Ok(self.get(handle)?.tree.persistent_id.clone())
    }

    fn load(&mut self, persistent_id: &str) -> Result<TaskHandle> {
        self.trees
            .iter()
            .position(|t| t.tree.persistent_id.as_deref() == Some(persistent_id))
            .map(TaskHandle)
            .ok_or_else(|| {
                PlateflowError::engine("load", format!("unknown task tree '{}'", persistent_id))
            })
    }

    fn submit(&mut self, handle: TaskHandle, start_index: u32) -> Result<()> {
        self.get(handle)?;
        let t = &mut self.trees[handle.0];
        t.tree.submit(start_index);
        t.calls_since_submit = 0;
        Ok(())
    }

    fn progress(&mut self) -> Result<()> {
        self.progress_calls += 1;
        if self.progress_failures.contains(&self.progress_calls) {
            return Err(PlateflowError::engine(
                "progress",
                format!("simulated failure on call {}", self.progress_calls),
            ));
        }
        if self.defer_persistence == Some(self.progress_calls) {
            self.flush();
        }

        for index in 0..self.trees.len() {
            let state = self.trees[index].tree.state();
            if state == TaskState::New || state.is_terminal() {
                continue;
            }
            if self.stop_at == Some(self.progress_calls) {
                self.trees[index].tree.stop();
                continue;
            }
            self.trees[index].calls_since_submit += 1;
            if self.trees[index].calls_since_submit >= self.terminate_after {
                self.finish(index);
            } else {
                for job_id in self.trees[index].tree.pending_jobs() {
                    if let Some(node) = self.trees[index].tree.job_mut(job_id) {
                        node.state = TaskState::Running;
                    }
                }
                self.trees[index].tree.root.state = TaskState::Running;
            }
            self.trees[index].tree.refresh();
        }
        Ok(())
    }

    fn tree(&self, handle: TaskHandle) -> Result<TaskTree> {
        let call = self.tree_calls.get() + 1;
        self.tree_calls.set(call);
        if self.tree_failures.contains(&call) {
            return Err(PlateflowError::engine(
                "status",
                format!("simulated failure on call {}", call),
            ));
        }
        Ok(self.get(handle)?.tree.clone())
    }

    fn stop(&mut self, handle: TaskHandle) -> Result<()> {
        self.get(handle)?;
        self.trees[handle.0].tree.stop();
        Ok(())
    }
}
