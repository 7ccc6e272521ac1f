//! Workspace directory layout.
//!
//! Path accessors are pure; they never create anything. Directories are
//! created only through [`Workspace::ensure_dir`], which logs what it does.
//!
//! ```text
//! <root>/
//!   .plateflow/config.yml
//!   .plateflow/store.yml
//!   <experiment>/
//!     structure.yml
//!     workflow/<step>/batches/
//!     workflow/<step>/session/
//!     workflow/<step>/log/
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CONFIG_DIR;
use crate::error::Result;
use crate::structure::ExperimentId;

/// Directory layout rooted at a workspace directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Default job store file.
    pub fn default_store_file(&self) -> PathBuf {
        self.root.join(CONFIG_DIR).join("store.yml")
    }

    /// Resolve a configured store path against the root.
    pub fn store_file(&self, configured: Option<&Path>) -> PathBuf {
        match configured {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.root.join(path),
            None => self.default_store_file(),
        }
    }

    /// Location of an experiment; all job paths are relative to it.
    pub fn experiment_dir(&self, experiment: ExperimentId) -> PathBuf {
        self.root.join(experiment.to_string())
    }

    pub fn structure_file(&self, experiment: ExperimentId) -> PathBuf {
        self.experiment_dir(experiment).join("structure.yml")
    }

    pub fn workflow_dir(&self, experiment: ExperimentId) -> PathBuf {
        self.experiment_dir(experiment).join("workflow")
    }

    pub fn step_dir(&self, experiment: ExperimentId, step: &str) -> PathBuf {
        self.workflow_dir(experiment).join(step)
    }

    pub fn batches_dir(&self, experiment: ExperimentId, step: &str) -> PathBuf {
        self.step_dir(experiment, step).join("batches")
    }

    pub fn session_dir(&self, experiment: ExperimentId, step: &str) -> PathBuf {
        self.step_dir(experiment, step).join("session")
    }

    pub fn log_dir(&self, experiment: ExperimentId, step: &str) -> PathBuf {
        self.step_dir(experiment, step).join("log")
    }

    /// Log file of a run job, or of the collect job when `job_id` is `None`.
    pub fn job_log_file(
        &self,
        experiment: ExperimentId,
        step: &str,
        job_id: Option<u32>,
        stream: &str,
    ) -> PathBuf {
        let name = match job_id {
            Some(id) => format!("{}_run_{:06}.{}", step, id, stream),
            None => format!("{}_collect.{}", step, stream),
        };
        self.log_dir(experiment, step).join(name)
    }

    /// Create a directory (and parents) if it does not exist yet.
    pub fn ensure_dir(&self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            tracing::debug!("Creating directory {}", path.display());
            fs::create_dir_all(path)?;
        }
        Ok(())
    }
}

/// Write a file through a temporary sibling and a rename, so readers
/// never observe a partial write.
pub(crate) fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn accessors_do_not_touch_disk() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        let batches = ws.batches_dir(ExperimentId(4), "imextract");

        assert_eq!(batches, temp.path().join("4/workflow/imextract/batches"));
        assert!(!batches.exists());
        assert!(!ws.experiment_dir(ExperimentId(4)).exists());
    }

    #[test]
    fn ensure_dir_creates_parents() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        let log = ws.log_dir(ExperimentId(1), "corilla");

        ws.ensure_dir(&log).unwrap();
        ws.ensure_dir(&log).unwrap();

        assert!(log.is_dir());
    }

    #[test]
    fn store_file_resolution() {
        let ws = Workspace::new("/data");
        assert_eq!(ws.store_file(None), PathBuf::from("/data/.plateflow/store.yml"));
        assert_eq!(
            ws.store_file(Some(Path::new("jobs.yml"))),
            PathBuf::from("/data/jobs.yml")
        );
        assert_eq!(
            ws.store_file(Some(Path::new("/var/jobs.yml"))),
            PathBuf::from("/var/jobs.yml")
        );
    }

    #[test]
    fn write_atomic_leaves_no_temp_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("a").join("state.yml");
        write_atomic(&path, b"x: 1").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "x: 1");
        assert!(!temp.path().join("a").join("state.yml.tmp").exists());
    }

    #[test]
    fn job_log_names() {
        let ws = Workspace::new("/w");
        let run = ws.job_log_file(ExperimentId(2), "imextract", Some(7), "out");
        let collect = ws.job_log_file(ExperimentId(2), "imextract", None, "err");
        assert!(run.ends_with("imextract_run_000007.out"));
        assert!(collect.ends_with("imextract_collect.err"));
    }
}
