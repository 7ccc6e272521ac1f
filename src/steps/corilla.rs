//! `corilla`: illumination statistics per acquisition and channel.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

use super::{
    parse_parameters, read_manifest, schema_of, single_output, write_manifest, JobContext,
    RecordSink, StepDefinition,
};
use crate::error::{PlateflowError, Result};
use crate::plan::{CollectDescription, JobDescription, JobDraft, StepPlan};
use crate::structure::StructuralSnapshot;

const STEP: &str = "corilla";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct CorillaParams {
    /// Upper percentile used to clip intensities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
}

/// Statistics descriptor written per acquisition and channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IllumstatsManifest {
    pub plate: String,
    pub acquisition: String,
    pub tpoint: u32,
    pub channel: u32,
    pub channel_name: String,
    pub n_images: usize,
    pub percentile: f64,
}

/// The `corilla` step.
pub struct Corilla;

const DEFAULT_PERCENTILE: f64 = 99.999;

impl StepDefinition for Corilla {
    fn name(&self) -> &str {
        STEP
    }

    fn description(&self) -> &str {
        "Calculate illumination statistics per channel"
    }

    fn parameter_schema(&self) -> Value {
        schema_of::<CorillaParams>()
    }

    fn validate(&self, parameters: &Value) -> Result<()> {
        let params: CorillaParams = parse_parameters(STEP, parameters)?;
        match params.percentile {
            Some(p) if !(0.0..=100.0).contains(&p) => Err(PlateflowError::validation(
                STEP,
                format!("percentile must be within [0, 100], got {}", p),
            )),
            _ => Ok(()),
        }
    }

    fn plan(&self, parameters: &Value, snapshot: &StructuralSnapshot) -> Result<StepPlan> {
        let params: CorillaParams = parse_parameters(STEP, parameters)?;
        let percentile = params.percentile.unwrap_or(DEFAULT_PERCENTILE);

        let mut run = Vec::new();
        let mut outputs = Vec::new();
        for r in snapshot.acquisitions() {
            let acquisition = r.acquisition;
            for channel in snapshot.channels() {
                let files: Vec<String> = acquisition
                    .channel_images(channel.index)
                    .iter()
                    .map(|i| i.file.clone())
                    .collect();
                if files.is_empty() {
                    continue;
                }
                let output = format!(
                    "workflow/{}/output/illumstats_{}_{}_c{:02}.json",
                    STEP, r.plate.name, acquisition.name, channel.index
                );
                outputs.push(output.clone());
                run.push(
                    JobDraft::new()
                        .input("image_files", files)
                        .output("illumstats_files", vec![output])
                        .param("plate", r.plate.name.clone())
                        .param("acquisition", acquisition.name.clone())
                        .param("tpoint", acquisition.tpoint)
                        .param("channel", channel.index)
                        .param("channel_name", channel.name.clone())
                        .param("percentile", percentile),
                );
            }
        }

        let mut collect = CollectDescription::default();
        collect.inputs.insert("illumstats_files".to_string(), outputs);
        Ok(StepPlan { run, collect })
    }

    fn run_job(&self, job: &JobDescription, _ctx: &JobContext) -> Result<()> {
        let number = |name: &str| job.params.get(name).and_then(Value::as_u64).unwrap_or(0);
        let manifest = IllumstatsManifest {
            plate: job.param_str("plate").unwrap_or_default().to_string(),
            acquisition: job.param_str("acquisition").unwrap_or_default().to_string(),
            tpoint: number("tpoint") as u32,
            channel: number("channel") as u32,
            channel_name: job.param_str("channel_name").unwrap_or_default().to_string(),
            n_images: job.inputs.get("image_files").map_or(0, Vec::len),
            percentile: job
                .params
                .get("percentile")
                .and_then(Value::as_f64)
                .unwrap_or(DEFAULT_PERCENTILE),
        };
        tracing::debug!(
            "Illumination statistics for channel {} over {} image(s)",
            manifest.channel_name,
            manifest.n_images
        );
        let output = single_output(
            STEP,
            job.outputs.get("illumstats_files"),
            "illumstats_files",
        )?;
        write_manifest(Path::new(output), &manifest)
    }

    fn collect_job_output(
        &self,
        collect: &CollectDescription,
        _ctx: &JobContext,
        sink: &mut dyn RecordSink,
    ) -> Result<()> {
        for path in collect.inputs.get("illumstats_files").into_iter().flatten() {
            let stats: IllumstatsManifest = read_manifest(Path::new(path))?;
            let file = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            sink.upsert(
                "illumstats",
                &format!("{}/t{}/c{}", stats.plate, stats.tpoint, stats.channel),
                json!({
                    "channel": stats.channel_name,
                    "n_images": stats.n_images,
                    "file": file,
                }),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BatchPlanner;
    use crate::steps::testing::{snapshot, MapSink};
    use crate::structure::ExperimentId;
    use tempfile::TempDir;

    #[test]
    fn one_job_per_acquisition_and_channel() {
        let batches = BatchPlanner::new()
            .plan(&Corilla, &json!({}), &snapshot())
            .unwrap();

        let order: Vec<(u64, u64)> = batches
            .run
            .iter()
            .map(|j| {
                (
                    j.params["tpoint"].as_u64().unwrap(),
                    j.params["channel"].as_u64().unwrap(),
                )
            })
            .collect();
        // acquisitions 2, 3, 5 in creation order; channels by index
        assert_eq!(order, vec![(0, 0), (0, 1), (0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(batches.run[0].param_str("channel_name"), Some("DAPI"));
    }

    #[test]
    fn channels_without_images_are_skipped() {
        let mut snap = snapshot();
        snap.channels.push(crate::structure::Channel {
            index: 7,
            name: "unused".into(),
        });
        let batches = BatchPlanner::new().plan(&Corilla, &json!({}), &snap).unwrap();
        assert_eq!(batches.run.len(), 6);
    }

    #[test]
    fn empty_experiment_plans_only_collect() {
        let snap = StructuralSnapshot::new(1, "empty");
        let batches = BatchPlanner::new().plan(&Corilla, &json!({}), &snap).unwrap();
        assert!(batches.run.is_empty());
        assert!(batches.collect.inputs["illumstats_files"].is_empty());
    }

    #[test]
    fn percentile_out_of_range_is_rejected() {
        let err = Corilla.validate(&json!({"percentile": 120.0})).unwrap_err();
        assert!(matches!(err, PlateflowError::Validation { .. }));
    }

    #[test]
    fn collect_keys_by_plate_cycle_and_channel() {
        let temp = TempDir::new().unwrap();
        let ctx = JobContext {
            experiment_id: ExperimentId(11),
            experiment_dir: temp.path().to_path_buf(),
        };
        let batches = BatchPlanner::new()
            .plan(&Corilla, &json!({"percentile": 99.0}), &snapshot())
            .unwrap();
        for job in &batches.run {
            Corilla.run_job(&job.absolute(temp.path()), &ctx).unwrap();
        }

        let mut sink = MapSink::default();
        Corilla
            .collect_job_output(&batches.collect.absolute(temp.path()), &ctx, &mut sink)
            .unwrap();

        assert_eq!(sink.count("illumstats"), 6);
        let dapi = &sink.records[&("illumstats".to_string(), "plateA/t1/c0".to_string())];
        assert_eq!(dapi["n_images"], 16);
    }
}
