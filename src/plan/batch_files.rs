//! On-disk persistence of a plan.
//!
//! A plan for step `s` lives in `workflow/<s>/batches/` as one
//! `<s>_run_NNNNNN.batch.json` per run job plus a single
//! `<s>_collect.batch.json`. Paths inside the files are relative to the
//! experiment location; readers get them back absolute.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::description::{Batches, CollectDescription, JobDescription};
use crate::error::{PlateflowError, Result};
use crate::structure::ExperimentId;
use crate::workspace::{write_atomic, Workspace};

/// Contents of the collect batch file: the collect job plus plan metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CollectBatchFile {
    step: String,
    experiment_id: ExperimentId,
    snapshot_fingerprint: String,
    run_count: u32,
    collect: CollectDescription,
}

/// Batch files of one step of one experiment.
#[derive(Debug, Clone)]
pub struct BatchFiles {
    step: String,
    experiment_id: ExperimentId,
    dir: PathBuf,
    experiment_dir: PathBuf,
}

impl BatchFiles {
    pub fn new(workspace: &Workspace, experiment_id: ExperimentId, step: &str) -> Self {
        Self {
            step: step.to_string(),
            experiment_id,
            dir: workspace.batches_dir(experiment_id, step),
            experiment_dir: workspace.experiment_dir(experiment_id),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn run_file(&self, job_id: u32) -> PathBuf {
        self.dir
            .join(format!("{}_run_{:06}.batch.json", self.step, job_id))
    }

    pub fn collect_file(&self) -> PathBuf {
        self.dir.join(format!("{}_collect.batch.json", self.step))
    }

    /// Whether a plan has been written.
    pub fn exists(&self) -> bool {
        self.collect_file().is_file()
    }

    /// Write a plan, replacing whatever plan was there before.
    pub fn write(&self, batches: &Batches) -> Result<()> {
        self.remove()?;
        fs::create_dir_all(&self.dir)?;

        for job in &batches.run {
            let relative = job.relative(&self.experiment_dir);
            write_json(&self.run_file(job.id), &relative)?;
        }

        let collect = CollectBatchFile {
            step: batches.step.clone(),
            experiment_id: batches.experiment_id,
            snapshot_fingerprint: batches.snapshot_fingerprint.clone(),
            run_count: batches.run.len() as u32,
            collect: batches.collect.relative(&self.experiment_dir),
        };
        write_json(&self.collect_file(), &collect)?;

        tracing::info!(
            "Wrote {} run batch file(s) for step '{}' to {}",
            batches.run.len(),
            self.step,
            self.dir.display()
        );
        Ok(())
    }

    /// Ids of the run batch files present on disk, ascending.
    pub fn run_ids(&self) -> Result<Vec<u32>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let pattern = Regex::new(&format!(
            r"^{}_run_(\d{{6}})\.batch\.json$",
            regex::escape(&self.step)
        ))
        .map_err(|e| anyhow::anyhow!("batch file pattern: {}", e))?;

        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(caps) = pattern.captures(&name) {
                if let Ok(id) = caps[1].parse::<u32>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Read one run job with absolute paths.
    pub fn read_job(&self, job_id: u32) -> Result<JobDescription> {
        let path = self.run_file(job_id);
        if !path.is_file() {
            return Err(PlateflowError::JobDescription {
                message: format!("Job description file does not exist: {}", path.display()),
            });
        }
        let job: JobDescription = read_json(&path)?;
        Ok(job.absolute(&self.experiment_dir))
    }

    /// Read the collect job with absolute paths.
    pub fn read_collect(&self) -> Result<CollectDescription> {
        Ok(self
            .read_collect_file()?
            .collect
            .absolute(&self.experiment_dir))
    }

    /// Read the whole plan with absolute paths.
    pub fn read(&self) -> Result<Batches> {
        let header = self.read_collect_file()?;
        let ids = self.run_ids()?;

        if header.run_count > 0 && ids.is_empty() {
            return Err(PlateflowError::JobDescription {
                message: "No batch files found.".to_string(),
            });
        }
        let expected: Vec<u32> = (1..=header.run_count).collect();
        if ids != expected {
            return Err(PlateflowError::JobDescription {
                message: format!(
                    "expected {} run batch files in {}, found {}",
                    header.run_count,
                    self.dir.display(),
                    ids.len()
                ),
            });
        }

        let run = ids
            .into_iter()
            .map(|id| self.read_job(id))
            .collect::<Result<Vec<_>>>()?;

        Ok(Batches {
            step: header.step,
            experiment_id: header.experiment_id,
            snapshot_fingerprint: header.snapshot_fingerprint,
            run,
            collect: header.collect.absolute(&self.experiment_dir),
        })
    }

    /// Delete all batch files of this step.
    pub fn remove(&self) -> Result<()> {
        if self.dir.is_dir() {
            tracing::debug!("Removing batch files in {}", self.dir.display());
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }

    fn read_collect_file(&self) -> Result<CollectBatchFile> {
        let path = self.collect_file();
        if !path.is_file() {
            return Err(PlateflowError::JobDescription {
                message: "No batch files found.".to_string(),
            });
        }
        let header: CollectBatchFile = read_json(&path)?;
        if header.step != self.step || header.experiment_id != self.experiment_id {
            return Err(PlateflowError::JobDescription {
                message: format!(
                    "{} belongs to step '{}' of experiment {}",
                    path.display(),
                    header.step,
                    header.experiment_id
                ),
            });
        }
        Ok(header)
    }
}

/// Move the batch and log directories of a step into a timestamped
/// `backup_<time>` directory next to them.
///
/// Returns the backup directory, or `None` if there was nothing to back up.
pub fn backup_step(
    workspace: &Workspace,
    experiment_id: ExperimentId,
    step: &str,
    now: DateTime<Utc>,
) -> Result<Option<PathBuf>> {
    let sources = [
        workspace.batches_dir(experiment_id, step),
        workspace.log_dir(experiment_id, step),
    ];
    if !sources.iter().any(|s| s.is_dir()) {
        return Ok(None);
    }

    let backup_dir = workspace
        .step_dir(experiment_id, step)
        .join(format!("backup_{}", now.format("%Y-%m-%d_%H-%M-%S")));
    workspace.ensure_dir(&backup_dir)?;

    for source in sources.iter().filter(|s| s.is_dir()) {
        if let Some(name) = source.file_name() {
            fs::rename(source, backup_dir.join(name))?;
        }
    }
    tracing::info!("Backed up step '{}' to {}", step, backup_dir.display());
    Ok(Some(backup_dir))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize {}: {}", path.display(), e))?;
    write_atomic(path, &content)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read(path)?;
    serde_json::from_slice(&content).map_err(|e| PlateflowError::JobDescription {
        message: format!("{}: {}", path.display(), e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::JobDraft;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn batches(run: u32) -> Batches {
        Batches {
            step: "imextract".into(),
            experiment_id: ExperimentId(2),
            snapshot_fingerprint: "f00d".into(),
            run: (1..=run)
                .map(|id| {
                    JobDescription::from_draft(
                        id,
                        JobDraft::new()
                            .input("image_files", vec![format!("images/{}.png", id)])
                            .output("manifest", vec![format!("out/{}.json", id)]),
                    )
                })
                .collect(),
            collect: CollectDescription {
                inputs: [("manifests".to_string(), vec!["out/1.json".to_string()])]
                    .into_iter()
                    .collect(),
                ..Default::default()
            },
        }
    }

    fn files(temp: &TempDir) -> BatchFiles {
        BatchFiles::new(&Workspace::new(temp.path()), ExperimentId(2), "imextract")
    }

    #[test]
    fn file_names_are_zero_padded() {
        let temp = TempDir::new().unwrap();
        let files = files(&temp);
        assert!(files
            .run_file(12)
            .ends_with("imextract_run_000012.batch.json"));
        assert!(files.collect_file().ends_with("imextract_collect.batch.json"));
    }

    #[test]
    fn written_files_hold_relative_paths_and_read_back_absolute() {
        let temp = TempDir::new().unwrap();
        let files = files(&temp);
        files.write(&batches(3)).unwrap();

        let raw = fs::read_to_string(files.run_file(2)).unwrap();
        assert!(raw.contains("\"images/2.png\""));

        let plan = files.read().unwrap();
        let exp_dir = temp.path().join("2");
        assert_eq!(plan.run.len(), 3);
        assert_eq!(
            plan.run[1].inputs["image_files"],
            vec![exp_dir.join("images/2.png").to_string_lossy().into_owned()]
        );
        assert_eq!(
            plan.collect.inputs["manifests"],
            vec![exp_dir.join("out/1.json").to_string_lossy().into_owned()]
        );
        assert_eq!(plan.snapshot_fingerprint, "f00d");
    }

    #[test]
    fn missing_plan_reports_no_batch_files() {
        let temp = TempDir::new().unwrap();
        let err = files(&temp).read().unwrap_err();
        assert!(err.to_string().contains("No batch files found."));
    }

    #[test]
    fn missing_run_files_report_no_batch_files() {
        let temp = TempDir::new().unwrap();
        let files = files(&temp);
        files.write(&batches(2)).unwrap();
        fs::remove_file(files.run_file(1)).unwrap();
        fs::remove_file(files.run_file(2)).unwrap();

        let err = files.read().unwrap_err();
        assert!(err.to_string().contains("No batch files found."));
    }

    #[test]
    fn zero_run_plan_reads_back() {
        let temp = TempDir::new().unwrap();
        let files = files(&temp);
        files.write(&batches(0)).unwrap();
        let plan = files.read().unwrap();
        assert!(plan.run.is_empty());
    }

    #[test]
    fn rewrite_drops_stale_run_files() {
        let temp = TempDir::new().unwrap();
        let files = files(&temp);
        files.write(&batches(5)).unwrap();
        files.write(&batches(2)).unwrap();

        assert_eq!(files.run_ids().unwrap(), vec![1, 2]);
        assert_eq!(files.read().unwrap().run.len(), 2);
    }

    #[test]
    fn read_job_for_unknown_id_fails() {
        let temp = TempDir::new().unwrap();
        let files = files(&temp);
        files.write(&batches(1)).unwrap();
        assert!(matches!(
            files.read_job(9).unwrap_err(),
            PlateflowError::JobDescription { .. }
        ));
    }

    #[test]
    fn backup_moves_batches_and_logs() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        let files = BatchFiles::new(&ws, ExperimentId(2), "imextract");
        files.write(&batches(1)).unwrap();
        ws.ensure_dir(&ws.log_dir(ExperimentId(2), "imextract")).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let backup = backup_step(&ws, ExperimentId(2), "imextract", now)
            .unwrap()
            .unwrap();

        assert!(backup.ends_with("backup_2024-03-01_12-00-00"));
        assert!(backup.join("batches").is_dir());
        assert!(backup.join("log").is_dir());
        assert!(!files.exists());
    }

    #[test]
    fn backup_without_previous_plan_is_noop() {
        let temp = TempDir::new().unwrap();
        let ws = Workspace::new(temp.path());
        assert!(backup_step(&ws, ExperimentId(2), "imextract", Utc::now())
            .unwrap()
            .is_none());
    }
}
