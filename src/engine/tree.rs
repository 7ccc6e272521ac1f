//! Task trees handed to an execution engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::ResourceSettings;
use crate::monitor::{observed_status, StatusTree};
use crate::plan::Batches;
use crate::store::JobStatus;
use crate::structure::ExperimentId;

/// Engine-side state of a task node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    #[default]
    New,
    Submitted,
    Running,
    Terminated,
    Stopped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Stopped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Submitted => "SUBMITTED",
            Self::Running => "RUNNING",
            Self::Terminated => "TERMINATED",
            Self::Stopped => "STOPPED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Root of a step's tree.
    Step,
    /// One run job.
    Job { job_id: u32 },
    /// The collect leaf. Never scheduled by the engine.
    Collect,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Job { .. } => "job",
            Self::Collect => "collect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: u64,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceSettings>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaskNode>,
}

impl TaskNode {
    fn leaf(id: u64, name: String, kind: NodeKind, resources: Option<ResourceSettings>) -> Self {
        Self {
            id,
            name,
            kind,
            state: TaskState::New,
            exit_code: None,
            resources,
            children: Vec::new(),
        }
    }

    pub fn job_id(&self) -> Option<u32> {
        match self.kind {
            NodeKind::Job { job_id } => Some(job_id),
            _ => None,
        }
    }

    /// Observed status derived from state and exit code.
    pub fn job_status(&self) -> JobStatus {
        observed_status(self.state, self.exit_code)
    }

    fn reset(&mut self, state: TaskState) {
        self.state = state;
        self.exit_code = None;
    }
}

impl StatusTree for TaskNode {
    fn node_id(&self) -> u64 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn node_type(&self) -> &str {
        self.kind.as_str()
    }

    fn job_id(&self) -> Option<u32> {
        TaskNode::job_id(self)
    }

    fn state(&self) -> TaskState {
        self.state
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    fn children(&self) -> &[Self] {
        &self.children
    }

    fn scheduled(&self) -> bool {
        self.kind != NodeKind::Collect
    }
}

/// Root, one child per run job, and the collect leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTree {
    /// Assigned by the engine once the tree is durably stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_id: Option<String>,
    pub experiment_id: ExperimentId,
    pub step: String,
    pub root: TaskNode,
}

impl TaskTree {
    pub fn new(
        experiment_id: ExperimentId,
        step: &str,
        job_ids: &[u32],
        resources: Option<ResourceSettings>,
    ) -> Self {
        let mut children: Vec<TaskNode> = job_ids
            .iter()
            .map(|&job_id| {
                TaskNode::leaf(
                    u64::from(job_id),
                    format!("{}_run_{:06}", step, job_id),
                    NodeKind::Job { job_id },
                    resources.clone(),
                )
            })
            .collect();
        let collect_id = job_ids.iter().copied().max().map_or(1, |m| u64::from(m) + 1);
        children.push(TaskNode::leaf(
            collect_id,
            format!("{}_collect", step),
            NodeKind::Collect,
            None,
        ));

        let mut root = TaskNode::leaf(0, step.to_string(), NodeKind::Step, None);
        root.children = children;
        Self {
            persistent_id: None,
            experiment_id,
            step: step.to_string(),
            root,
        }
    }

    pub fn from_batches(batches: &Batches, resources: Option<ResourceSettings>) -> Self {
        let ids: Vec<u32> = batches.run.iter().map(|j| j.id).collect();
        Self::new(batches.experiment_id, &batches.step, &ids, resources)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &TaskNode> {
        self.root
            .children
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::Job { .. }))
    }

    pub fn job(&self, job_id: u32) -> Option<&TaskNode> {
        self.jobs().find(|n| n.job_id() == Some(job_id))
    }

    pub fn job_mut(&mut self, job_id: u32) -> Option<&mut TaskNode> {
        self.root
            .children
            .iter_mut()
            .find(|n| n.job_id() == Some(job_id))
    }

    pub fn collect_node(&self) -> Option<&TaskNode> {
        self.root
            .children
            .iter()
            .find(|n| n.kind == NodeKind::Collect)
    }

    pub fn state(&self) -> TaskState {
        self.root.state
    }

    /// Mark jobs for execution.
    ///
    /// Jobs with an id of at least `start_index` are reset and resubmitted;
    /// jobs below it keep their status unless they never ran.
    pub fn submit(&mut self, start_index: u32) {
        for node in self.root.children.iter_mut() {
            let Some(job_id) = node.job_id() else {
                continue;
            };
            if job_id >= start_index || node.state == TaskState::New {
                node.reset(TaskState::Submitted);
            }
        }
        let any_done = self.jobs().any(|n| n.state.is_terminal());
        let state = if any_done {
            TaskState::Running
        } else {
            TaskState::Submitted
        };
        self.root.reset(state);
    }

    /// Stop every job that has not finished. A finished tree is left as is.
    pub fn stop(&mut self) {
        if self.root.state.is_terminal() {
            return;
        }
        for node in self.root.children.iter_mut() {
            if node.job_id().is_some() && !node.state.is_terminal() {
                node.reset(TaskState::Stopped);
            }
        }
        self.root.reset(TaskState::Stopped);
    }

    /// Recompute the root state from the run jobs.
    ///
    /// A root without run jobs terminates successfully as soon as it has
    /// been submitted.
    pub fn refresh(&mut self) {
        if self.root.state == TaskState::New || self.root.state == TaskState::Stopped {
            return;
        }
        let states: Vec<TaskState> = self.jobs().map(|n| n.state).collect();
        if states.is_empty() {
            self.root.state = TaskState::Terminated;
            self.root.exit_code = Some(0);
            return;
        }

        let all_terminal = states.iter().all(|s| s.is_terminal());
        let (state, exit_code) = if all_terminal {
            if states.contains(&TaskState::Stopped) {
                (TaskState::Stopped, None)
            } else {
                let failed = self.jobs().any(|n| n.exit_code != Some(0));
                (TaskState::Terminated, Some(if failed { 1 } else { 0 }))
            }
        } else if states.contains(&TaskState::Running) || states.iter().any(|s| s.is_terminal())
        {
            (TaskState::Running, None)
        } else if states.contains(&TaskState::Submitted) {
            (TaskState::Submitted, None)
        } else {
            (TaskState::New, None)
        };
        self.root.state = state;
        self.root.exit_code = exit_code;
    }

    /// Ids of submitted jobs waiting to run, ascending.
    pub fn pending_jobs(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .jobs()
            .filter(|n| n.state == TaskState::Submitted)
            .filter_map(TaskNode::job_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Record the outcome of a job.
    pub fn finish_job(&mut self, job_id: u32, exit_code: i32) {
        if let Some(node) = self.job_mut(job_id) {
            node.state = TaskState::Terminated;
            node.exit_code = Some(exit_code);
        }
    }
}
