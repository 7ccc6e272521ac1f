//! Job descriptions produced by planning.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::structure::ExperimentId;

/// Named groups of file paths (e.g. `"image_files" -> [...]`).
pub type PathMap = BTreeMap<String, Vec<String>>;

/// A planned run job before an id has been assigned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDraft {
    #[serde(default)]
    pub inputs: PathMap,
    #[serde(default)]
    pub outputs: PathMap,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl JobDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an input group.
    pub fn input(mut self, name: &str, paths: Vec<String>) -> Self {
        self.inputs.insert(name.to_string(), paths);
        self
    }

    /// Add an output group.
    pub fn output(mut self, name: &str, paths: Vec<String>) -> Self {
        self.outputs.insert(name.to_string(), paths);
        self
    }

    /// Add a parameter.
    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

/// One independently executable run job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescription {
    /// 1-based, contiguous within a plan.
    pub id: u32,
    #[serde(default)]
    pub inputs: PathMap,
    #[serde(default)]
    pub outputs: PathMap,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl JobDescription {
    pub fn from_draft(id: u32, draft: JobDraft) -> Self {
        Self {
            id,
            inputs: draft.inputs,
            outputs: draft.outputs,
            params: draft.params,
        }
    }

    /// A copy with every path joined onto `base`.
    pub fn absolute(&self, base: &Path) -> Self {
        Self {
            inputs: map_paths(&self.inputs, |p| absolutize(p, base)),
            outputs: map_paths(&self.outputs, |p| absolutize(p, base)),
            ..self.clone()
        }
    }

    /// A copy with every path under `base` made relative to it.
    pub fn relative(&self, base: &Path) -> Self {
        Self {
            inputs: map_paths(&self.inputs, |p| relativize(p, base)),
            outputs: map_paths(&self.outputs, |p| relativize(p, base)),
            ..self.clone()
        }
    }

    /// A string parameter, if present.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// The single reduce job of a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectDescription {
    #[serde(default)]
    pub inputs: PathMap,
    #[serde(default)]
    pub outputs: PathMap,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Inputs the collect phase deletes once merged.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removals: Vec<String>,
}

impl CollectDescription {
    pub fn absolute(&self, base: &Path) -> Self {
        Self {
            inputs: map_paths(&self.inputs, |p| absolutize(p, base)),
            outputs: map_paths(&self.outputs, |p| absolutize(p, base)),
            ..self.clone()
        }
    }

    pub fn relative(&self, base: &Path) -> Self {
        Self {
            inputs: map_paths(&self.inputs, |p| relativize(p, base)),
            outputs: map_paths(&self.outputs, |p| relativize(p, base)),
            ..self.clone()
        }
    }
}

/// What a step hands back from planning: ordered drafts plus the collect job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepPlan {
    pub run: Vec<JobDraft>,
    pub collect: CollectDescription,
}

/// A complete plan for one step of one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batches {
    pub step: String,
    pub experiment_id: ExperimentId,
    /// Fingerprint of the snapshot the plan was computed from.
    pub snapshot_fingerprint: String,
    pub run: Vec<JobDescription>,
    pub collect: CollectDescription,
}

impl Batches {
    /// Look up a run job by id.
    pub fn job(&self, id: u32) -> Option<&JobDescription> {
        // ids are contiguous from 1
        self.run
            .get((id as usize).wrapping_sub(1))
            .filter(|j| j.id == id)
    }

    /// Every output path of every run job, then of the collect job.
    pub fn expected_outputs(&self) -> Vec<String> {
        let mut outputs: Vec<String> = self
            .run
            .iter()
            .flat_map(|j| j.outputs.values().flatten().cloned())
            .collect();
        outputs.extend(self.collect.outputs.values().flatten().cloned());
        outputs
    }

    /// Every input path of every run job.
    pub fn required_inputs(&self) -> Vec<String> {
        self.run
            .iter()
            .flat_map(|j| j.inputs.values().flatten().cloned())
            .collect()
    }
}

fn map_paths(map: &PathMap, f: impl Fn(&str) -> String) -> PathMap {
    map.iter()
        .map(|(k, paths)| (k.clone(), paths.iter().map(|p| f(p)).collect()))
        .collect()
}

/// Join a relative path onto `base`; absolute paths are left alone.
pub fn absolutize(path: &str, base: &Path) -> String {
    let p = Path::new(path);
    if p.is_absolute() {
        path.to_string()
    } else {
        base.join(p).to_string_lossy().into_owned()
    }
}

/// Strip `base` from a path below it; other paths are left alone.
pub fn relativize(path: &str, base: &Path) -> String {
    match Path::new(path).strip_prefix(base) {
        Ok(rel) => rel.to_string_lossy().into_owned(),
        Err(_) => path.to_string(),
    }
}

/// Turn a list of relative paths into absolute ones.
pub fn absolute_paths(paths: &[String], base: &Path) -> Vec<PathBuf> {
    paths.iter().map(|p| PathBuf::from(absolutize(p, base))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job(id: u32) -> JobDescription {
        JobDescription::from_draft(
            id,
            JobDraft::new()
                .input("image_files", vec![format!("images/{}.png", id)])
                .output("manifest", vec![format!("out/{}.json", id)])
                .param("channel", 0),
        )
    }

    #[test]
    fn absolute_and_relative_are_inverse() {
        let base = Path::new("/data/7");
        let rel = job(3);
        let abs = rel.absolute(base);

        assert_eq!(abs.inputs["image_files"], vec!["/data/7/images/3.png"]);
        assert_eq!(abs.relative(base), rel);
    }

    #[test]
    fn relativize_leaves_foreign_paths() {
        assert_eq!(relativize("/elsewhere/x.png", Path::new("/data/7")), "/elsewhere/x.png");
        assert_eq!(absolutize("/elsewhere/x.png", Path::new("/data/7")), "/elsewhere/x.png");
    }

    #[test]
    fn expected_outputs_include_collect() {
        let batches = Batches {
            step: "corilla".into(),
            experiment_id: ExperimentId(1),
            snapshot_fingerprint: "abc".into(),
            run: vec![job(1), job(2)],
            collect: CollectDescription {
                outputs: [("summary".to_string(), vec!["summary.json".to_string()])]
                    .into_iter()
                    .collect(),
                ..Default::default()
            },
        };

        assert_eq!(
            batches.expected_outputs(),
            vec!["out/1.json", "out/2.json", "summary.json"]
        );
        assert_eq!(batches.required_inputs(), vec!["images/1.png", "images/2.png"]);
    }

    #[test]
    fn job_lookup_by_id() {
        let batches = Batches {
            step: "s".into(),
            experiment_id: ExperimentId(1),
            snapshot_fingerprint: String::new(),
            run: vec![job(1), job(2)],
            collect: CollectDescription::default(),
        };
        assert_eq!(batches.job(2).map(|j| j.id), Some(2));
        assert!(batches.job(0).is_none());
        assert!(batches.job(3).is_none());
    }

    #[test]
    fn draft_builder_collects_params() {
        let draft = JobDraft::new().param("regex", "A(\\d+)").param("n", 2);
        assert_eq!(Value::Object(draft.params), json!({"regex": "A(\\d+)", "n": 2}));
    }
}
