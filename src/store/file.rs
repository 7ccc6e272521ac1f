use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use super::{DomainRecord, JobRecord, JobStore, StoreData, Submission, UpsertOutcome};
use crate::error::{PlateflowError, Result};
use crate::structure::ExperimentId;
use crate::workspace::write_atomic;

const LOCK_POLL: Duration = Duration::from_millis(20);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Exclusive hold on `<store>.lock`, released on drop.
#[derive(Debug)]
struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    fn acquire(store: &Path, timeout: Duration) -> Result<Self> {
        let mut name = store.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        let path = store.with_file_name(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let started = Instant::now();
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let _ = writeln!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if started.elapsed() >= timeout {
                        return Err(PlateflowError::store(format!(
                            "{} is held by another process; remove it if no plateflow command is running",
                            path.display()
                        )));
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(e) => {
                    return Err(PlateflowError::store(format!(
                        "cannot create {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Record upserts held in memory between `begin_records` and
/// `commit_records`, together with the lock that guards them.
#[derive(Debug)]
struct RecordBatch {
    _lock: StoreLock,
    data: StoreData,
    dirty: bool,
}

/// Job store backed by a single YAML file.
///
/// The file is the only source of truth: every read loads it and every
/// change runs load, apply and save while holding `<store>.lock`, so
/// several processes can share one store. Saves go through a temporary
/// file and a rename.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock_timeout: Duration,
    batch: Option<RecordBatch>,
}

impl FileStore {
    /// Open the store at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        Self::load(&path)?;
        tracing::debug!("Opened job store {}", path.display());
        Ok(Self {
            path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            batch: None,
        })
    }

    /// How long a change waits for another holder of the lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<StoreData> {
        if !path.exists() {
            return Ok(StoreData::new());
        }
        let content = fs::read_to_string(path).map_err(|e| {
            PlateflowError::store(format!("cannot read {}: {}", path.display(), e))
        })?;
        if content.trim().is_empty() {
            return Ok(StoreData::new());
        }
        let data: StoreData = serde_yaml::from_str(&content).map_err(|e| {
            PlateflowError::store(format!("{} is corrupt: {}", path.display(), e))
        })?;
        if data.version > StoreData::CURRENT_VERSION {
            return Err(PlateflowError::store(format!(
                "{} has version {}, this build understands up to {}",
                path.display(),
                data.version,
                StoreData::CURRENT_VERSION
            )));
        }
        Ok(data)
    }

    fn save(&self, data: &StoreData) -> Result<()> {
        let content = serde_yaml::to_string(data)
            .map_err(|e| PlateflowError::store(format!("Failed to serialize store: {}", e)))?;
        write_atomic(&self.path, content.as_bytes()).map_err(|e| {
            PlateflowError::store(format!("cannot write {}: {}", self.path.display(), e))
        })
    }

    /// Current contents: the open batch if there is one, the file otherwise.
    fn current(&self) -> Result<Cow<'_, StoreData>> {
        match &self.batch {
            Some(batch) => Ok(Cow::Borrowed(&batch.data)),
            None => Self::load(&self.path).map(Cow::Owned),
        }
    }

    /// Apply a change to the latest file contents under the lock. Returns
    /// the change's result and whether anything was modified.
    fn mutate<T>(
        &mut self,
        change: impl FnOnce(&mut StoreData) -> Result<(T, bool)>,
    ) -> Result<T> {
        if let Some(batch) = &mut self.batch {
            let (result, changed) = change(&mut batch.data)?;
            batch.dirty |= changed;
            return Ok(result);
        }
        let _lock = StoreLock::acquire(&self.path, self.lock_timeout)?;
        let mut data = Self::load(&self.path)?;
        let (result, changed) = change(&mut data)?;
        if changed {
            self.save(&data)?;
        }
        Ok(result)
    }
}

impl JobStore for FileStore {
    fn create_submission(
        &mut self,
        experiment_id: ExperimentId,
        program: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Submission> {
        self.mutate(|data| Ok((data.create_submission(experiment_id, program, created_at), true)))
    }

    fn submission(&self, id: u64) -> Result<Option<Submission>> {
        Ok(self.current()?.submissions.get(&id).cloned())
    }

    fn submissions(&self, experiment_id: ExperimentId, program: &str) -> Result<Vec<Submission>> {
        Ok(self.current()?.submissions(experiment_id, program))
    }

    fn update_submission(&mut self, submission: &Submission) -> Result<()> {
        self.mutate(|data| data.update_submission(submission).map(|()| ((), true)))
    }

    fn job_statuses(&self, submission_id: u64) -> Result<BTreeMap<u32, JobRecord>> {
        Ok(self
            .current()?
            .job_statuses
            .get(&submission_id)
            .cloned()
            .unwrap_or_default())
    }

    fn put_job_statuses(&mut self, submission_id: u64, records: &[JobRecord]) -> Result<()> {
        self.mutate(|data| {
            data.put_job_statuses(submission_id, records);
            Ok(((), true))
        })
    }

    fn upsert_record(
        &mut self,
        kind: &str,
        natural_key: &str,
        value: serde_json::Value,
    ) -> Result<UpsertOutcome> {
        self.mutate(|data| {
            let outcome = data.upsert_record(kind, natural_key, value);
            Ok((outcome, outcome != UpsertOutcome::Unchanged))
        })
    }

    fn record(&self, kind: &str, natural_key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .current()?
            .records
            .get(kind)
            .and_then(|r| r.get(natural_key))
            .cloned())
    }

    fn records(&self, kind: &str) -> Result<Vec<DomainRecord>> {
        Ok(self.current()?.records(kind))
    }

    fn begin_records(&mut self) -> Result<()> {
        if self.batch.is_some() {
            return Ok(());
        }
        let lock = StoreLock::acquire(&self.path, self.lock_timeout)?;
        let data = Self::load(&self.path)?;
        self.batch = Some(RecordBatch {
            _lock: lock,
            data,
            dirty: false,
        });
        Ok(())
    }

    fn commit_records(&mut self) -> Result<()> {
        let Some(batch) = self.batch.take() else {
            return Ok(());
        };
        if batch.dirty {
            self.save(&batch.data)?;
            tracing::debug!("Committed record batch to {}", self.path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobStatus;
    use crate::submission::SubmissionPhase;
    use serde_json::json;
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn modified(path: &Path) -> SystemTime {
        fs::metadata(path).unwrap().modified().unwrap()
    }

    #[test]
    fn missing_file_opens_empty() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::open(temp.path().join("store.yml")).unwrap();
        assert!(store.submissions(ExperimentId(1), "x").unwrap().is_empty());
    }

    #[test]
    fn survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".plateflow").join("store.yml");

        let mut store = FileStore::open(&path).unwrap();
        let s = store
            .create_submission(ExperimentId(3), "metaconfig", Utc::now())
            .unwrap();
        store
            .put_job_statuses(
                s.id,
                &[JobRecord {
                    job_id: 1,
                    status: JobStatus::TerminatedFailed,
                    exit_code: Some(2),
                }],
            )
            .unwrap();
        store.upsert_record("well", "p/A01", json!({"name": "A01"})).unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.submission(s.id).unwrap(), Some(s.clone()));
        assert_eq!(
            reopened.job_statuses(s.id).unwrap()[&1].exit_code,
            Some(2)
        );
        assert_eq!(
            reopened.record("well", "p/A01").unwrap(),
            Some(json!({"name": "A01"}))
        );
        assert!(!path.with_file_name("store.yml.lock").exists());
    }

    #[test]
    fn ids_continue_after_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.yml");
        let first = FileStore::open(&path)
            .unwrap()
            .create_submission(ExperimentId(1), "x", Utc::now())
            .unwrap();
        let second = FileStore::open(&path)
            .unwrap()
            .create_submission(ExperimentId(1), "x", Utc::now())
            .unwrap();
        assert!(second.id > first.id);
    }

    #[test]
    fn handles_on_one_file_do_not_lose_each_others_writes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.yml");
        let mut a = FileStore::open(&path).unwrap();
        let mut b = FileStore::open(&path).unwrap();

        let first = a.create_submission(ExperimentId(1), "x", Utc::now()).unwrap();
        let second = b.create_submission(ExperimentId(1), "x", Utc::now()).unwrap();
        assert_ne!(first.id, second.id);

        let mut stopped = first.clone();
        stopped.phase = SubmissionPhase::Stopped;
        b.update_submission(&stopped).unwrap();
        a.put_job_statuses(
            first.id,
            &[JobRecord {
                job_id: 1,
                status: JobStatus::Running,
                exit_code: None,
            }],
        )
        .unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.submissions(ExperimentId(1), "x").unwrap().len(), 2);
        assert_eq!(
            a.submission(first.id).unwrap().map(|s| s.phase),
            Some(SubmissionPhase::Stopped)
        );
        assert_eq!(reopened.job_statuses(first.id).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_writers_allocate_distinct_ids() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.yml");

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let path = path.clone();
                thread::spawn(move || {
                    let mut store = FileStore::open(&path).unwrap();
                    (0..15)
                        .map(|_| {
                            store
                                .create_submission(ExperimentId(1), "x", Utc::now())
                                .unwrap()
                                .id
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut ids: Vec<u64> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();

        assert_eq!(ids.len(), 30);
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.submissions(ExperimentId(1), "x").unwrap().len(), 30);
    }

    #[test]
    fn held_lock_times_out_as_store_unavailable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.yml");
        fs::write(temp.path().join("store.yml.lock"), "1").unwrap();
        let mut store = FileStore::open(&path)
            .unwrap()
            .with_lock_timeout(Duration::from_millis(50));

        let err = store
            .create_submission(ExperimentId(1), "x", Utc::now())
            .unwrap_err();

        assert!(matches!(err, PlateflowError::StoreUnavailable { .. }));
        assert!(err.to_string().contains("store.yml.lock"));
    }

    #[test]
    fn corrupt_file_is_store_unavailable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.yml");
        fs::write(&path, "submissions: [not, a, map").unwrap();
        let err = FileStore::open(&path).unwrap_err();
        assert!(matches!(err, PlateflowError::StoreUnavailable { .. }));
    }

    #[test]
    fn unchanged_upsert_leaves_file_untouched() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.yml");
        let mut store = FileStore::open(&path).unwrap();
        store.upsert_record("site", "k", json!(1)).unwrap();
        let before = fs::read_to_string(&path).unwrap();
        let stamp = modified(&path);

        let outcome = store.upsert_record("site", "k", json!(1)).unwrap();

        assert_eq!(outcome, UpsertOutcome::Unchanged);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert_eq!(modified(&path), stamp);
    }

    #[test]
    fn record_batch_is_written_once_on_commit() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.yml");
        let mut store = FileStore::open(&path).unwrap();

        store.begin_records().unwrap();
        for i in 0..100 {
            let outcome = store
                .upsert_record("site", &format!("s{}", i), json!(i))
                .unwrap();
            assert_eq!(outcome, UpsertOutcome::Created);
        }
        assert_eq!(
            store.upsert_record("site", "s7", json!(7)).unwrap(),
            UpsertOutcome::Unchanged
        );
        assert!(!path.exists());
        assert_eq!(store.records("site").unwrap().len(), 100);

        store.commit_records().unwrap();

        assert!(!path.with_file_name("store.yml.lock").exists());
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.records("site").unwrap().len(), 100);
    }

    #[test]
    fn unchanged_batch_does_not_rewrite() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("store.yml");
        let mut store = FileStore::open(&path).unwrap();
        store.upsert_record("site", "k", json!(1)).unwrap();
        let stamp = modified(&path);

        store.begin_records().unwrap();
        store.upsert_record("site", "k", json!(1)).unwrap();
        store.commit_records().unwrap();

        assert_eq!(modified(&path), stamp);
    }
}
