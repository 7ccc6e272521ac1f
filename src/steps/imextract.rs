//! `imextract`: extract channel images from microscope image files.
//!
//! Every (acquisition, well, site, channel) becomes one channel image whose
//! z-planes are projected together. Channel images are split into run jobs
//! of `batch_size`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;

use super::{
    parse_parameters, read_manifest, schema_of, write_manifest, JobContext, RecordSink,
    StepDefinition,
};
use crate::error::{PlateflowError, Result};
use crate::plan::{chunk, CollectDescription, JobDescription, JobDraft, StepPlan};
use crate::structure::StructuralSnapshot;

const STEP: &str = "imextract";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct ImextractParams {
    /// Number of channel images per run job.
    pub batch_size: usize,
    /// Delete the microscope image files once all channel images are collected.
    pub delete: bool,
}

impl Default for ImextractParams {
    fn default() -> Self {
        Self {
            batch_size: 100,
            delete: false,
        }
    }
}

/// One channel image and the microscope planes it is projected from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelImage {
    pub plate: String,
    pub acquisition: String,
    pub tpoint: u32,
    pub well: String,
    pub site: u32,
    pub channel: u32,
    pub planes: Vec<String>,
}

impl ChannelImage {
    fn output_path(&self) -> String {
        format!(
            "workflow/{}/output/{}/{}_{}_s{:03}_c{:02}_t{:03}.json",
            STEP, self.plate, self.acquisition, self.well, self.site, self.channel, self.tpoint
        )
    }

    fn natural_key(&self) -> String {
        format!(
            "{}/{}/{}/c{}/t{}",
            self.plate, self.well, self.site, self.channel, self.tpoint
        )
    }
}

/// The `imextract` step.
pub struct ImageExtraction;

impl StepDefinition for ImageExtraction {
    fn name(&self) -> &str {
        STEP
    }

    fn description(&self) -> &str {
        "Extract channel images from microscope image files"
    }

    fn parameter_schema(&self) -> Value {
        schema_of::<ImextractParams>()
    }

    fn validate(&self, parameters: &Value) -> Result<()> {
        parse_parameters::<ImextractParams>(STEP, parameters).map(|_| ())
    }

    fn plan(&self, parameters: &Value, snapshot: &StructuralSnapshot) -> Result<StepPlan> {
        let params: ImextractParams = parse_parameters(STEP, parameters)?;

        let mut images: Vec<ChannelImage> = Vec::new();
        let mut microscope_files = Vec::new();
        for r in snapshot.acquisitions() {
            let acquisition = r.acquisition;
            for file in acquisition.ordered_images() {
                microscope_files.push(file.file.clone());
                // ordered_images sorts z-planes last, so planes of one
                // channel image are adjacent
                match images.last_mut() {
                    Some(last)
                        if last.acquisition == acquisition.name
                            && last.plate == r.plate.name
                            && last.well == file.well
                            && last.site == file.site
                            && last.channel == file.channel =>
                    {
                        last.planes.push(file.file.clone());
                    }
                    _ => images.push(ChannelImage {
                        plate: r.plate.name.clone(),
                        acquisition: acquisition.name.clone(),
                        tpoint: acquisition.tpoint,
                        well: file.well.clone(),
                        site: file.site,
                        channel: file.channel,
                        planes: vec![file.file.clone()],
                    }),
                }
            }
        }

        let mut outputs = Vec::new();
        let run = chunk(&images, params.batch_size)
            .into_iter()
            .map(|batch| {
                let batch_outputs: Vec<String> = batch.iter().map(|i| i.output_path()).collect();
                outputs.extend(batch_outputs.iter().cloned());
                JobDraft::new()
                    .input(
                        "microscope_image_files",
                        batch.iter().flat_map(|i| i.planes.clone()).collect(),
                    )
                    .output("channel_image_files", batch_outputs)
                    .param("images", json!(batch))
            })
            .collect();

        let mut collect = CollectDescription::default();
        collect
            .inputs
            .insert("channel_image_files".to_string(), outputs);
        if params.delete {
            collect.removals = microscope_files;
        }
        Ok(StepPlan { run, collect })
    }

    fn run_job(&self, job: &JobDescription, ctx: &JobContext) -> Result<()> {
        let images: Vec<ChannelImage> = job
            .params
            .get("images")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| PlateflowError::validation(STEP, format!("images: {}", e)))?
            .unwrap_or_default();
        let outputs = job
            .outputs
            .get("channel_image_files")
            .cloned()
            .unwrap_or_default();
        if outputs.len() != images.len() {
            return Err(PlateflowError::validation(
                STEP,
                format!(
                    "job {} lists {} images but {} outputs",
                    job.id,
                    images.len(),
                    outputs.len()
                ),
            ));
        }

        for (image, output) in images.iter().zip(&outputs) {
            tracing::debug!(
                "Extracting {} plane(s) for {}",
                image.planes.len(),
                image.natural_key()
            );
            let mut manifest = image.clone();
            manifest.planes = image
                .planes
                .iter()
                .map(|p| crate::plan::description::absolutize(p, &ctx.experiment_dir))
                .collect();
            write_manifest(Path::new(output), &manifest)?;
        }
        Ok(())
    }

    fn collect_job_output(
        &self,
        collect: &CollectDescription,
        ctx: &JobContext,
        sink: &mut dyn RecordSink,
    ) -> Result<()> {
        for path in collect.inputs.get("channel_image_files").into_iter().flatten() {
            let image: ChannelImage = read_manifest(Path::new(path))?;
            let file = Path::new(path)
                .strip_prefix(&ctx.experiment_dir)
                .unwrap_or(Path::new(path))
                .to_string_lossy()
                .into_owned();
            sink.upsert(
                "channel_image",
                &image.natural_key(),
                json!({
                    "plate": image.plate,
                    "well": image.well,
                    "site": image.site,
                    "channel": image.channel,
                    "tpoint": image.tpoint,
                    "file": file,
                }),
            )?;
        }

        for removal in &collect.removals {
            let path = Path::new(removal);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                ctx.experiment_dir.join(path)
            };
            if path.is_file() {
                tracing::debug!("Removing microscope image {}", path.display());
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn allows_empty_plan(&self) -> bool {
        false
    }
}
