//! Bounded-depth status snapshots of any task tree.

use serde::Serialize;

use crate::engine::TaskState;
use crate::store::{JobRecord, JobStatus};

/// A tree whose nodes report an engine state.
///
/// Implemented by the engine's node type; the traversal in [`snapshot`]
/// does not depend on how the engine shapes its tree.
pub trait StatusTree: Sized {
    fn node_id(&self) -> u64;
    fn name(&self) -> &str;
    fn node_type(&self) -> &str;
    fn job_id(&self) -> Option<u32>;
    fn state(&self) -> TaskState;
    fn exit_code(&self) -> Option<i32>;
    fn children(&self) -> &[Self];

    /// Whether the engine schedules this node. Unscheduled nodes do not
    /// count towards their parent's progress.
    fn scheduled(&self) -> bool {
        true
    }
}

/// Observed job status for an engine state and exit code.
pub fn observed_status(state: TaskState, exit_code: Option<i32>) -> JobStatus {
    match state {
        TaskState::New => JobStatus::Created,
        TaskState::Submitted => JobStatus::Submitted,
        TaskState::Running => JobStatus::Running,
        TaskState::Stopped => JobStatus::Stopped,
        TaskState::Terminated if exit_code == Some(0) => JobStatus::TerminatedOk,
        TaskState::Terminated => JobStatus::TerminatedFailed,
    }
}

/// One node of a status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusNode {
    pub id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<u32>,
    pub state: TaskState,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Submitted, running or stopped.
    pub live: bool,
    pub done: bool,
    /// Terminated with a non-zero (or missing) exit code.
    pub failed: bool,
    /// Share of terminated children; 100 or 0 for leaves.
    pub percent_done: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<StatusNode>,
}

impl StatusNode {
    /// Statuses of all run jobs resolved in this snapshot, by job id.
    pub fn job_records(&self) -> Vec<JobRecord> {
        let mut records = Vec::new();
        self.walk(&mut |node| {
            if let Some(job_id) = node.job_id {
                records.push(JobRecord {
                    job_id,
                    status: node.status,
                    exit_code: node.exit_code,
                });
            }
        });
        records.sort_by_key(|r| r.job_id);
        records
    }

    /// Every failed node, in depth-first order.
    pub fn failed_nodes(&self) -> Vec<&StatusNode> {
        let mut failed = Vec::new();
        collect_failed(self, &mut failed);
        failed
    }

    /// Ids of failed run jobs, ascending.
    pub fn failed_job_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .failed_nodes()
            .into_iter()
            .filter_map(|n| n.job_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn walk(&self, f: &mut dyn FnMut(&StatusNode)) {
        f(self);
        for child in &self.subtasks {
            child.walk(f);
        }
    }
}

fn collect_failed<'a>(node: &'a StatusNode, out: &mut Vec<&'a StatusNode>) {
    if node.failed {
        out.push(node);
    }
    for child in &node.subtasks {
        collect_failed(child, out);
    }
}

/// Build a snapshot of `node`, resolving at most `depth` levels below it.
///
/// `None` resolves the whole tree. Depth 0 yields the aggregate node only.
pub fn snapshot<T: StatusTree>(node: &T, depth: Option<usize>) -> StatusNode {
    let state = node.state();
    let exit_code = node.exit_code();
    let done = state == TaskState::Terminated;

    let scheduled: Vec<&T> = node.children().iter().filter(|c| c.scheduled()).collect();
    let percent_done = if scheduled.is_empty() {
        if done {
            100.0
        } else {
            0.0
        }
    } else {
        let finished = scheduled
            .iter()
            .filter(|c| c.state() == TaskState::Terminated)
            .count();
        finished as f64 / scheduled.len() as f64 * 100.0
    };

    let subtasks = match depth {
        Some(0) => Vec::new(),
        _ => {
            let next = depth.map(|d| d - 1);
            node.children()
                .iter()
                .map(|child| snapshot(child, next))
                .collect()
        }
    };

    StatusNode {
        id: node.node_id(),
        name: node.name().to_string(),
        node_type: node.node_type().to_string(),
        job_id: node.job_id(),
        state,
        status: observed_status(state, exit_code),
        exit_code,
        live: matches!(
            state,
            TaskState::Submitted | TaskState::Running | TaskState::Stopped
        ),
        done,
        failed: done && exit_code != Some(0),
        percent_done,
        subtasks,
    }
}
