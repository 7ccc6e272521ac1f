//! `metaconfig`: configure acquisition metadata.
//!
//! One run job per acquisition. Each job places the imaged sites of every
//! well on the acquisition grid according to the stitch layout and writes a
//! manifest. The collect job merges wells, sites and cycles into the store.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;

use super::{
    parse_parameters, read_manifest, schema_of, single_output, write_manifest, JobContext,
    RecordSink, StepDefinition,
};
use crate::error::{PlateflowError, Result};
use crate::plan::{CollectDescription, JobDescription, JobDraft, StepPlan};
use crate::structure::StructuralSnapshot;

const STEP: &str = "metaconfig";

/// Order in which sites were acquired on the grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StitchLayout {
    /// Row by row, left to right.
    Horizontal,
    /// Row by row, reversing direction every other row.
    #[default]
    ZigzagHorizontal,
    /// Column by column, top to bottom.
    Vertical,
    /// Column by column, reversing direction every other column.
    ZigzagVertical,
}

/// Longer axis of the acquisition grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MajorAxis {
    #[default]
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct MetaconfigParams {
    /// Microscope file format handler.
    pub file_format: String,
    /// Regular expression every image file name must match.
    pub regex: Option<String>,
    pub stitch_layout: StitchLayout,
    pub stitch_major_axis: MajorAxis,
    /// Number of sites along the vertical axis of a well.
    pub n_vertical: Option<u32>,
    /// Number of sites along the horizontal axis of a well.
    pub n_horizontal: Option<u32>,
}

impl Default for MetaconfigParams {
    fn default() -> Self {
        Self {
            file_format: "default".to_string(),
            regex: None,
            stitch_layout: StitchLayout::default(),
            stitch_major_axis: MajorAxis::default(),
            n_vertical: None,
            n_horizontal: None,
        }
    }
}

/// Grid position of one site, one-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitePosition {
    pub well: String,
    pub site: u32,
    pub y: u32,
    pub x: u32,
}

/// What a run job writes for its acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionManifest {
    pub plate: String,
    pub acquisition: String,
    pub tpoint: u32,
    pub rows: u32,
    pub cols: u32,
    pub sites: Vec<SitePosition>,
}

/// Guess grid dimensions `(rows, cols)` for `n_sites`.
///
/// Picks the most square factorization; the major axis gets the larger
/// count.
pub fn guess_dimensions(n_sites: u32, major: MajorAxis) -> (u32, u32) {
    let n = n_sites.max(1);
    let mut small = (n as f64).sqrt() as u32;
    while small > 1 && n % small != 0 {
        small -= 1;
    }
    let small = small.max(1);
    let large = n / small;
    match major {
        MajorAxis::Vertical => (large, small),
        MajorAxis::Horizontal => (small, large),
    }
}

/// Resolve grid dimensions from optional explicit counts.
///
/// The grid must hold every site and may not be larger than the sites
/// need: neither side may exceed `n_sites`, and the unused cells must fit
/// in less than one row or column.
pub fn grid_dimensions(
    n_sites: u32,
    n_vertical: Option<u32>,
    n_horizontal: Option<u32>,
    major: MajorAxis,
) -> Result<(u32, u32)> {
    let (rows, cols) = match (n_vertical, n_horizontal) {
        (Some(rows), Some(cols)) => (rows, cols),
        (Some(rows), None) => (rows, n_sites.div_ceil(rows.max(1))),
        (None, Some(cols)) => (n_sites.div_ceil(cols.max(1)), cols),
        (None, None) => guess_dimensions(n_sites, major),
    };
    if rows == 0 || cols == 0 {
        return Err(PlateflowError::validation(
            STEP,
            format!("{}x{} is not a valid acquisition grid", rows, cols),
        ));
    }
    let cells = rows.checked_mul(cols).ok_or_else(|| {
        PlateflowError::validation(STEP, format!("a {}x{} acquisition grid is too large", rows, cols))
    })?;
    if cells < n_sites {
        return Err(PlateflowError::validation(
            STEP,
            format!("{} sites do not fit a {}x{} grid", n_sites, rows, cols),
        ));
    }
    let n = n_sites.max(1);
    if rows > n || cols > n || cells - n >= rows.max(cols) {
        return Err(PlateflowError::validation(
            STEP,
            format!("a {}x{} grid is larger than {} site(s) need", rows, cols, n_sites),
        ));
    }
    Ok((rows, cols))
}

/// One-based `(y, x)` of each acquisition in order, for a `rows` x `cols` grid.
pub fn layout_coordinates(rows: u32, cols: u32, layout: StitchLayout) -> Vec<(u32, u32)> {
    let capacity = rows.checked_mul(cols).unwrap_or(0) as usize;
    let mut coordinates = Vec::with_capacity(capacity);
    match layout {
        StitchLayout::Horizontal | StitchLayout::ZigzagHorizontal => {
            for row in 0..rows {
                let reverse = layout == StitchLayout::ZigzagHorizontal && row % 2 == 1;
                for i in 0..cols {
                    let col = if reverse { cols - 1 - i } else { i };
                    coordinates.push((row + 1, col + 1));
                }
            }
        }
        StitchLayout::Vertical | StitchLayout::ZigzagVertical => {
            for col in 0..cols {
                let reverse = layout == StitchLayout::ZigzagVertical && col % 2 == 1;
                for i in 0..rows {
                    let row = if reverse { rows - 1 - i } else { i };
                    coordinates.push((row + 1, col + 1));
                }
            }
        }
    }
    coordinates
}

/// The `metaconfig` step.
pub struct MetadataConfiguration;

impl MetadataConfiguration {
    fn params(parameters: &Value) -> Result<MetaconfigParams> {
        let params: MetaconfigParams = parse_parameters(STEP, parameters)?;
        if let Some(pattern) = &params.regex {
            Regex::new(pattern).map_err(|e| {
                PlateflowError::validation(STEP, format!("invalid regex '{}': {}", pattern, e))
            })?;
        }
        if params.n_vertical == Some(0) || params.n_horizontal == Some(0) {
            return Err(PlateflowError::validation(
                STEP,
                "n_vertical and n_horizontal must be positive",
            ));
        }
        if let (Some(rows), Some(cols)) = (params.n_vertical, params.n_horizontal) {
            if rows.checked_mul(cols).is_none() {
                return Err(PlateflowError::validation(
                    STEP,
                    format!("a {}x{} acquisition grid is too large", rows, cols),
                ));
            }
        }
        Ok(params)
    }
}

impl StepDefinition for MetadataConfiguration {
    fn name(&self) -> &str {
        STEP
    }

    fn description(&self) -> &str {
        "Configure acquisition metadata and site positions"
    }

    fn parameter_schema(&self) -> Value {
        schema_of::<MetaconfigParams>()
    }

    fn validate(&self, parameters: &Value) -> Result<()> {
        Self::params(parameters).map(|_| ())
    }

    fn plan(&self, parameters: &Value, snapshot: &StructuralSnapshot) -> Result<StepPlan> {
        let params = Self::params(parameters)?;
        let mut run = Vec::new();
        let mut manifests = Vec::new();

        for r in snapshot.acquisitions() {
            let acquisition = r.acquisition;
            let output = format!(
                "workflow/{}/output/{}_{}.json",
                STEP, r.plate.name, acquisition.name
            );
            let wells: BTreeMap<&str, Vec<u32>> = acquisition
                .wells()
                .into_iter()
                .map(|w| (w, acquisition.sites(w)))
                .collect();
            let images: Vec<String> = acquisition
                .ordered_images()
                .iter()
                .map(|i| i.file.clone())
                .collect();

            run.push(
                JobDraft::new()
                    .input("metadata_files", acquisition.metadata_files.clone())
                    .input("image_files", images)
                    .output("metadata", vec![output.clone()])
                    .param("plate", r.plate.name.clone())
                    .param("acquisition", acquisition.name.clone())
                    .param("acquisition_id", acquisition.id)
                    .param("tpoint", acquisition.tpoint)
                    .param("microscope_type", snapshot.microscope_type.clone())
                    .param("file_format", params.file_format.clone())
                    .param("regex", json!(params.regex))
                    .param("stitch_layout", json!(params.stitch_layout))
                    .param("stitch_major_axis", json!(params.stitch_major_axis))
                    .param("n_vertical", json!(params.n_vertical))
                    .param("n_horizontal", json!(params.n_horizontal))
                    .param("wells", json!(wells)),
            );
            manifests.push(output);
        }

        let mut collect = CollectDescription::default();
        collect.inputs.insert("metadata".to_string(), manifests);
        Ok(StepPlan { run, collect })
    }

    fn run_job(&self, job: &JobDescription, _ctx: &JobContext) -> Result<()> {
        let params: MetaconfigParams = parse_parameters(STEP, &layout_params(job))?;

        let wells: BTreeMap<String, Vec<u32>> = job
            .params
            .get("wells")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| PlateflowError::validation(STEP, format!("wells: {}", e)))?
            .unwrap_or_default();

        if let Some(pattern) = &params.regex {
            let regex = Regex::new(pattern)
                .map_err(|e| PlateflowError::validation(STEP, e.to_string()))?;
            for file in job.inputs.get("image_files").into_iter().flatten() {
                let name = Path::new(file)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !regex.is_match(&name) {
                    return Err(anyhow::anyhow!(
                        "image file '{}' does not match regex '{}'",
                        name,
                        pattern
                    )
                    .into());
                }
            }
        }

        let counts: Vec<usize> = wells.values().map(Vec::len).collect();
        if counts.windows(2).any(|w| w[0] != w[1]) {
            return Err(anyhow::anyhow!(
                "Each well must have the same number of acquisition sites."
            )
            .into());
        }
        let n_sites = counts.first().copied().unwrap_or(0) as u32;
        let (rows, cols) = grid_dimensions(
            n_sites,
            params.n_vertical,
            params.n_horizontal,
            params.stitch_major_axis,
        )?;
        let coordinates = layout_coordinates(rows, cols, params.stitch_layout);

        tracing::debug!(
            "Acquisition grid {}x{} ({:?}) for {} site(s) per well",
            rows,
            cols,
            params.stitch_layout,
            n_sites
        );

        let sites = wells
            .iter()
            .flat_map(|(well, sites)| {
                sites
                    .iter()
                    .zip(&coordinates)
                    .map(move |(site, (y, x))| SitePosition {
                        well: well.clone(),
                        site: *site,
                        y: *y,
                        x: *x,
                    })
            })
            .collect();

        let manifest = AcquisitionManifest {
            plate: job.param_str("plate").unwrap_or_default().to_string(),
            acquisition: job.param_str("acquisition").unwrap_or_default().to_string(),
            tpoint: job
                .params
                .get("tpoint")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            rows,
            cols,
            sites,
        };
        let output = single_output(STEP, job.outputs.get("metadata"), "metadata")?;
        write_manifest(Path::new(output), &manifest)
    }

    fn collect_job_output(
        &self,
        collect: &CollectDescription,
        _ctx: &JobContext,
        sink: &mut dyn RecordSink,
    ) -> Result<()> {
        for path in collect.inputs.get("metadata").into_iter().flatten() {
            let manifest: AcquisitionManifest = read_manifest(Path::new(path))?;
            sink.upsert(
                "cycle",
                &format!("{}/{}", manifest.plate, manifest.tpoint),
                json!({"plate": manifest.plate, "tpoint": manifest.tpoint}),
            )?;
            for site in &manifest.sites {
                sink.upsert(
                    "well",
                    &format!("{}/{}", manifest.plate, site.well),
                    json!({"plate": manifest.plate, "name": site.well}),
                )?;
                sink.upsert(
                    "site",
                    &format!("{}/{}/{}/{}", manifest.plate, site.well, site.y, site.x),
                    json!({
                        "plate": manifest.plate,
                        "well": site.well,
                        "y": site.y,
                        "x": site.x,
                    }),
                )?;
            }
        }
        Ok(())
    }

    fn allows_empty_plan(&self) -> bool {
        false
    }
}

/// The layout parameters carried by a job, without nulls.
fn layout_params(job: &JobDescription) -> Value {
    let keys = [
        "file_format",
        "regex",
        "stitch_layout",
        "stitch_major_axis",
        "n_vertical",
        "n_horizontal",
    ];
    let map = keys
        .iter()
        .filter_map(|k| {
            job.params
                .get(*k)
                .filter(|v| !v.is_null())
                .map(|v| (k.to_string(), v.clone()))
        })
        .collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::BatchPlanner;
    use crate::steps::testing::{snapshot, MapSink};
    use crate::structure::ExperimentId;
    use tempfile::TempDir;

    #[test]
    fn unknown_layout_is_rejected() {
        let err = MetadataConfiguration
            .validate(&json!({"stitch_layout": "diagonal"}))
            .unwrap_err();
        assert!(matches!(err, PlateflowError::Validation { .. }));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(MetadataConfiguration
            .validate(&json!({"layout": "vertical"}))
            .is_err());
    }

    #[test]
    fn bad_regex_is_rejected() {
        let err = MetadataConfiguration
            .validate(&json!({"regex": "("}))
            .unwrap_err();
        assert!(err.to_string().contains("invalid regex"));
    }

    #[test]
    fn defaults_validate() {
        assert!(MetadataConfiguration.validate(&json!({})).is_ok());
        assert!(MetadataConfiguration.validate(&Value::Null).is_ok());
    }

    #[test]
    fn one_job_per_acquisition_in_creation_order() {
        let batches = BatchPlanner::new()
            .plan(&MetadataConfiguration, &json!({}), &snapshot())
            .unwrap();

        let acquisitions: Vec<u64> = batches
            .run
            .iter()
            .map(|j| j.params["acquisition_id"].as_u64().unwrap())
            .collect();
        assert_eq!(acquisitions, vec![2, 3, 5]);
        assert_eq!(batches.collect.inputs["metadata"].len(), 3);
    }

    #[test]
    fn empty_experiment_is_empty_work() {
        let snap = StructuralSnapshot::new(1, "empty");
        let err = BatchPlanner::new()
            .plan(&MetadataConfiguration, &json!({}), &snap)
            .unwrap_err();
        assert!(matches!(err, PlateflowError::EmptyWork { .. }));
    }

    #[test]
    fn guessed_dimensions_follow_major_axis() {
        assert_eq!(guess_dimensions(12, MajorAxis::Vertical), (4, 3));
        assert_eq!(guess_dimensions(12, MajorAxis::Horizontal), (3, 4));
        assert_eq!(guess_dimensions(7, MajorAxis::Vertical), (7, 1));
        assert_eq!(guess_dimensions(1, MajorAxis::Vertical), (1, 1));
    }

    #[test]
    fn explicit_dimensions_must_fit() {
        assert_eq!(grid_dimensions(6, Some(2), None, MajorAxis::Vertical).unwrap(), (2, 3));
        assert_eq!(grid_dimensions(6, None, Some(4), MajorAxis::Vertical).unwrap(), (2, 4));
        assert!(grid_dimensions(6, Some(2), Some(2), MajorAxis::Vertical).is_err());
    }

    #[test]
    fn oversized_grids_are_validation_errors() {
        let err = grid_dimensions(4, Some(70_000), Some(70_000), MajorAxis::Vertical).unwrap_err();
        assert!(matches!(err, PlateflowError::Validation { .. }));
        assert!(err.to_string().contains("too large"));

        let err = grid_dimensions(4, Some(100), Some(100), MajorAxis::Vertical).unwrap_err();
        assert!(matches!(err, PlateflowError::Validation { .. }));
        assert!(grid_dimensions(4, Some(4), None, MajorAxis::Vertical).is_ok());
        assert!(grid_dimensions(4, Some(3), Some(3), MajorAxis::Vertical).is_err());
    }

    #[test]
    fn overflowing_grid_is_rejected_by_validate() {
        let err = MetadataConfiguration
            .validate(&json!({"n_vertical": 70000, "n_horizontal": 70000}))
            .unwrap_err();
        assert!(matches!(err, PlateflowError::Validation { .. }));
    }

    #[test]
    fn zigzag_horizontal_snakes_rows() {
        let coords = layout_coordinates(2, 3, StitchLayout::ZigzagHorizontal);
        assert_eq!(coords, vec![(1, 1), (1, 2), (1, 3), (2, 3), (2, 2), (2, 1)]);
    }

    #[test]
    fn vertical_fills_columns() {
        let coords = layout_coordinates(2, 2, StitchLayout::Vertical);
        assert_eq!(coords, vec![(1, 1), (2, 1), (1, 2), (2, 2)]);
        let zigzag = layout_coordinates(2, 2, StitchLayout::ZigzagVertical);
        assert_eq!(zigzag, vec![(1, 1), (2, 1), (2, 2), (1, 2)]);
    }

    #[test]
    fn run_then_collect_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let ctx = JobContext {
            experiment_id: ExperimentId(11),
            experiment_dir: temp.path().to_path_buf(),
        };
        let batches = BatchPlanner::new()
            .plan(
                &MetadataConfiguration,
                &json!({"stitch_layout": "horizontal"}),
                &snapshot(),
            )
            .unwrap();
        for job in &batches.run {
            MetadataConfiguration
                .run_job(&job.absolute(temp.path()), &ctx)
                .unwrap();
        }
        let collect = batches.collect.absolute(temp.path());

        let mut sink = MapSink::default();
        MetadataConfiguration
            .collect_job_output(&collect, &ctx, &mut sink)
            .unwrap();
        // 2 plates x 2 wells, 4 sites each; plate A cycles 0 and 1, plate B cycle 0
        assert_eq!(sink.count("well"), 4);
        assert_eq!(sink.count("site"), 16);
        assert_eq!(sink.count("cycle"), 3);

        let before = sink.records.clone();
        MetadataConfiguration
            .collect_job_output(&collect, &ctx, &mut sink)
            .unwrap();
        assert_eq!(sink.records, before);
    }

    #[test]
    fn regex_mismatch_fails_job() {
        let temp = TempDir::new().unwrap();
        let ctx = JobContext {
            experiment_id: ExperimentId(11),
            experiment_dir: temp.path().to_path_buf(),
        };
        let batches = BatchPlanner::new()
            .plan(&MetadataConfiguration, &json!({"regex": "^never"}), &snapshot())
            .unwrap();
        let err = MetadataConfiguration
            .run_job(&batches.run[0].absolute(temp.path()), &ctx)
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}
