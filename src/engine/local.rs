use std::fs;
use std::path::PathBuf;

use regex::Regex;

use super::runner::JobRunner;
use super::tree::{TaskState, TaskTree};
use super::{ExecutionEngine, TaskHandle};
use crate::error::{PlateflowError, Result};
use crate::structure::ExperimentId;
use crate::workspace::{write_atomic, Workspace};

/// Single-process engine keeping its task trees as session files.
///
/// Trees are written to `workflow/<step>/session/task_tree_NNNN.yml`; the
/// persistent id `<experiment>/<step>/NNNN` is assigned by that write.
/// Each `progress` call runs up to `max_in_flight` submitted jobs per tree,
/// one after another.
pub struct LocalEngine {
    workspace: Workspace,
    runner: Box<dyn JobRunner>,
    max_in_flight: usize,
    trees: Vec<TaskTree>,
}

impl LocalEngine {
    pub fn new(workspace: Workspace, runner: Box<dyn JobRunner>, max_in_flight: usize) -> Self {
        Self {
            workspace,
            runner,
            max_in_flight: max_in_flight.max(1),
            trees: Vec::new(),
        }
    }

    fn session_file(&self, experiment_id: ExperimentId, step: &str, seq: u32) -> PathBuf {
        self.workspace
            .session_dir(experiment_id, step)
            .join(format!("task_tree_{:04}.yml", seq))
    }

    fn next_sequence(&self, experiment_id: ExperimentId, step: &str) -> Result<u32> {
        let dir = self.workspace.session_dir(experiment_id, step);
        if !dir.is_dir() {
            return Ok(1);
        }
        let pattern = Regex::new(r"^task_tree_(\d{4,})\.yml$")
            .map_err(|e| PlateflowError::Other(e.into()))?;
        let mut max = 0;
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name();
            if let Some(caps) = pattern.captures(&name.to_string_lossy()) {
                max = max.max(caps[1].parse::<u32>().unwrap_or(0));
            }
        }
        Ok(max + 1)
    }

    fn path_of(&self, persistent_id: &str) -> Result<PathBuf> {
        let mut parts = persistent_id.splitn(3, '/');
        let parsed = match (parts.next(), parts.next(), parts.next()) {
            (Some(exp), Some(step), Some(seq)) => exp
                .parse::<ExperimentId>()
                .ok()
                .zip(seq.parse::<u32>().ok())
                .map(|(exp, seq)| self.session_file(exp, step, seq)),
            _ => None,
        };
        parsed.ok_or_else(|| {
            PlateflowError::engine("load", format!("malformed task tree id '{}'", persistent_id))
        })
    }

    fn persist(&self, tree: &TaskTree) -> Result<()> {
        let Some(id) = &tree.persistent_id else {
            return Ok(());
        };
        let path = self.path_of(id)?;
        let content = serde_yaml::to_string(tree)
            .map_err(|e| PlateflowError::engine("persist", e.to_string()))?;
        write_atomic(&path, content.as_bytes())
            .map_err(|e| PlateflowError::engine("persist", e.to_string()))
    }

    fn read(&self, persistent_id: &str) -> Result<TaskTree> {
        let path = self.path_of(persistent_id)?;
        let content = fs::read_to_string(&path).map_err(|e| {
            PlateflowError::engine("load", format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            PlateflowError::engine("load", format!("{} is corrupt: {}", path.display(), e))
        })
    }

    fn get(&self, handle: TaskHandle) -> Result<&TaskTree> {
        self.trees
            .get(handle.0)
            .ok_or_else(|| PlateflowError::engine("lookup", format!("unknown handle {}", handle)))
    }

    fn get_mut(&mut self, handle: TaskHandle) -> Result<&mut TaskTree> {
        self.trees
            .get_mut(handle.0)
            .ok_or_else(|| PlateflowError::engine("lookup", format!("unknown handle {}", handle)))
    }

    /// Adopt a stop written to the session file by another process.
    /// Returns true when the tree is now stopped.
    fn observe_external_stop(&mut self, index: usize) -> bool {
        let Some(id) = self.trees[index].persistent_id.clone() else {
            return false;
        };
        match self.read(&id) {
            Ok(on_disk) if on_disk.state() == TaskState::Stopped => {
                if self.trees[index].state() != TaskState::Stopped {
                    tracing::warn!("Task tree {} was stopped externally", id);
                }
                self.trees[index] = on_disk;
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::debug!("Could not re-read task tree {}: {}", id, e);
                false
            }
        }
    }

    fn advance(&mut self, index: usize) -> Result<()> {
        if self.observe_external_stop(index) {
            return Ok(());
        }
        let tree = &self.trees[index];
        if matches!(tree.state(), TaskState::New) || tree.state().is_terminal() {
            return Ok(());
        }

        let experiment_id = tree.experiment_id;
        let step = tree.step.clone();
        let batch: Vec<u32> = tree
            .pending_jobs()
            .into_iter()
            .take(self.max_in_flight)
            .collect();

        for (position, job_id) in batch.into_iter().enumerate() {
            if position > 0 && self.observe_external_stop(index) {
                return Ok(());
            }
            let exit_code = match self.runner.run(experiment_id, &step, job_id) {
                Ok(code) => code,
                Err(e) => {
                    tracing::error!("Job {} of {} could not be started: {}", job_id, step, e);
                    1
                }
            };
            tracing::debug!("Job {} of {} exited with {}", job_id, step, exit_code);
            self.trees[index].finish_job(job_id, exit_code);
        }

        // a stop written while the last job ran wins over its result
        if self.observe_external_stop(index) {
            return Ok(());
        }
        self.trees[index].refresh();
        self.persist(&self.trees[index])
    }
}

impl ExecutionEngine for LocalEngine {
    fn store(&mut self, mut tree: TaskTree) -> Result<TaskHandle> {
        let seq = self.next_sequence(tree.experiment_id, &tree.step)?;
        tree.persistent_id = Some(format!("{}/{}/{:04}", tree.experiment_id, tree.step, seq));
        self.persist(&tree)?;
        tracing::debug!(
            "Stored task tree {}",
            tree.persistent_id.as_deref().unwrap_or_default()
        );
        self.trees.push(tree);
        Ok(TaskHandle(self.trees.len() - 1))
    }

    fn persistent_id(&self, handle: TaskHandle) -> Result<Option<String>> {
        Ok(self.get(handle)?.persistent_id.clone())
    }

    fn load(&mut self, persistent_id: &str) -> Result<TaskHandle> {
        if let Some(index) = self
            .trees
            .iter()
            .position(|t| t.persistent_id.as_deref() == Some(persistent_id))
        {
            return Ok(TaskHandle(index));
        }
        let tree = self.read(persistent_id)?;
        tracing::debug!("Loaded task tree {}", persistent_id);
        self.trees.push(tree);
        Ok(TaskHandle(self.trees.len() - 1))
    }

    fn submit(&mut self, handle: TaskHandle, start_index: u32) -> Result<()> {
        let tree = self.get_mut(handle)?;
        tree.submit(start_index);
        tracing::debug!(
            "Submitted task tree {} from job {}",
            handle,
            start_index
        );
        let tree = self.get(handle)?;
        self.persist(tree)
    }

    fn progress(&mut self) -> Result<()> {
        for index in 0..self.trees.len() {
            self.advance(index)?;
        }
        Ok(())
    }

    fn tree(&self, handle: TaskHandle) -> Result<TaskTree> {
        self.get(handle).cloned()
    }

    fn stop(&mut self, handle: TaskHandle) -> Result<()> {
        let tree = self.get_mut(handle)?;
        tree.stop();
        tracing::info!(
            "Stopped task tree {}",
            tree.persistent_id.as_deref().unwrap_or_default()
        );
        let tree = self.get(handle)?;
        self.persist(tree)
    }
}
