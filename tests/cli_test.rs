//! Integration tests for the plateflow binary.
// The cargo_bin function is marked deprecated in favor of cargo_bin! macro,
// but both work correctly. Suppressing until assert_cmd stabilizes the new API.
#![allow(deprecated)]

use assert_cmd::cargo::cargo_bin;
use assert_cmd::Command;
use plateflow::structure::{
    save_snapshot, Acquisition, Channel, ExperimentId, ImageFile, Plate, StructuralSnapshot,
};
use plateflow::workspace::Workspace;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const EXP: ExperimentId = ExperimentId(7);

fn setup_experiment() -> TempDir {
    let temp = TempDir::new().unwrap();
    let images = (0..2)
        .map(|channel| ImageFile {
            file: format!("images/run0_A01_s0_c{}.tif", channel),
            well: "A01".into(),
            site: 0,
            channel,
            zplane: 0,
        })
        .collect();
    let mut snap = StructuralSnapshot::new(EXP, "screen");
    snap.channels = vec![
        Channel {
            index: 0,
            name: "DAPI".into(),
        },
        Channel {
            index: 1,
            name: "GFP".into(),
        },
    ];
    snap.plates = vec![Plate {
        name: "P1".into(),
        acquisitions: vec![Acquisition {
            id: 1,
            name: "run0".into(),
            tpoint: 0,
            metadata_files: Vec::new(),
            images,
        }],
    }];
    save_snapshot(&Workspace::new(temp.path()).structure_file(EXP), &snap).unwrap();
    temp
}

fn plateflow(temp: &TempDir) -> Command {
    let mut cmd = Command::new(cargo_bin("plateflow"));
    cmd.arg("--root").arg(temp.path()).env_remove("PLATEFLOW_ROOT");
    cmd
}

fn output_file(temp: &TempDir, name: &str) -> PathBuf {
    Workspace::new(temp.path())
        .step_dir(EXP, "corilla")
        .join("output")
        .join(name)
}

#[test]
fn cli_shows_help() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin("plateflow"));
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("resubmit"));
    Ok(())
}

#[test]
fn cli_shows_version() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin("plateflow"));
    cmd.arg("--version");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
    Ok(())
}

#[test]
fn cli_requires_a_command() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin("plateflow"));
    cmd.assert().failure();
    Ok(())
}

#[test]
fn cli_lists_steps() -> Result<(), Box<dyn std::error::Error>> {
    let temp = TempDir::new()?;
    plateflow(&temp)
        .arg("steps")
        .assert()
        .success()
        .stdout(predicate::str::contains("metaconfig"))
        .stdout(predicate::str::contains("imextract"))
        .stdout(predicate::str::contains("corilla"));
    Ok(())
}

#[test]
fn cli_plan_submit_collect() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_experiment();

    plateflow(&temp)
        .args(["plan", "7", "corilla"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Planned 2 run job(s)"));

    plateflow(&temp)
        .args(["submit", "7", "corilla", "--interval", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 job(s) terminated successfully"));
    assert!(output_file(&temp, "illumstats_P1_run0_c00.json").is_file());

    plateflow(&temp)
        .args(["collect", "7", "corilla"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 record(s) merged"));

    plateflow(&temp)
        .args(["status", "7", "corilla", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"phase\""))
        .stdout(predicate::str::contains("COLLECTED"));
    Ok(())
}

#[test]
fn cli_submit_reports_failed_jobs() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_experiment();
    plateflow(&temp)
        .args(["plan", "7", "corilla"])
        .assert()
        .success();
    fs::create_dir_all(output_file(&temp, "illumstats_P1_run0_c00.json"))?;

    plateflow(&temp)
        .args(["submit", "7", "corilla", "--interval", "0", "--collect"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("1 job(s) failed: 1"));

    plateflow(&temp)
        .args(["collect", "7", "corilla"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("gated"));

    plateflow(&temp)
        .args(["log", "7", "corilla", "--job", "1", "--stderr"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
    Ok(())
}

#[test]
fn cli_submit_without_plan_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_experiment();
    plateflow(&temp)
        .args(["submit", "7", "corilla", "--interval", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No batch files found"));
    Ok(())
}

#[test]
fn cli_unknown_step_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_experiment();
    plateflow(&temp)
        .args(["plan", "7", "segment"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown step: segment"));
    Ok(())
}

fn write_stats_workflow(temp: &TempDir) {
    let dir = temp.path().join(".plateflow");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("config.yml"),
        "workflows:\n  stats:\n    stages:\n      - name: preprocessing\n        mode: parallel\n        steps:\n          - name: corilla\n",
    )
    .unwrap();
}

#[test]
fn cli_workflow_runs_configured_stages() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_experiment();
    write_stats_workflow(&temp);

    plateflow(&temp)
        .args(["workflow", "7", "stats", "--interval", "0"])
        .assert()
        .success()
        .stdout(predicate::str::contains("corilla"))
        .stdout(predicate::str::contains("Workflow stats finished"));
    assert!(output_file(&temp, "illumstats_P1_run0_c01.json").is_file());

    plateflow(&temp)
        .args(["status", "7", "corilla", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("COLLECTED"));
    Ok(())
}

#[test]
fn cli_workflow_reports_failed_step() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_experiment();
    write_stats_workflow(&temp);
    fs::create_dir_all(output_file(&temp, "illumstats_P1_run0_c00.json"))?;

    plateflow(&temp)
        .args(["workflow", "7", "stats", "--interval", "0"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("failed at step(s): corilla"));
    Ok(())
}

#[test]
fn cli_workflow_unknown_name_fails() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_experiment();
    plateflow(&temp)
        .args(["workflow", "7", "nightly"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("workflow 'nightly'"));
    Ok(())
}

#[test]
fn cli_cleanup_with_yes() -> Result<(), Box<dyn std::error::Error>> {
    let temp = setup_experiment();
    plateflow(&temp)
        .args(["plan", "7", "corilla"])
        .assert()
        .success();
    plateflow(&temp)
        .args(["cleanup", "7", "corilla", "--yes"])
        .assert()
        .success();
    assert!(!Workspace::new(temp.path())
        .batches_dir(EXP, "corilla")
        .join("corilla_collect.batch.json")
        .exists());
    Ok(())
}

#[test]
fn cli_completions_generate() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin("plateflow"));
    cmd.args(["completions", "bash"]);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("plateflow"));
    Ok(())
}
