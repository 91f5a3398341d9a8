//! End-to-end tests of the `narps` binary on a synthetic base directory

mod utils;

use predicates::prelude::*;

fn narps(basedir: &std::path::Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("narps");
    cmd.env_remove("NARPS_BASEDIR").arg("--basedir").arg(basedir);
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("narps");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("decisions"))
        .stdout(predicate::str::contains("distances"))
        .stdout(predicate::str::contains("simulate"))
        .stdout(predicate::str::contains("consensus"));
}

#[test]
fn test_missing_subcommand_fails() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("narps");
    cmd.assert().failure();
}

#[test]
fn test_decisions_writes_tables() {
    let dir = utils::narps_basedir(24);
    narps(dir.path())
        .arg("decisions")
        .assert()
        .success()
        .stdout(predicate::str::contains("Decision Model"))
        .stdout(predicate::str::contains("smoothness"));

    let out = dir.path().join("output");
    for name in [
        "decision_effects.csv",
        "decision_coefficients.csv",
        "decision_univariate.csv",
        "decision_per_hypothesis.csv",
        "decision_posthoc.csv",
        "decision_report.txt",
    ] {
        assert!(out.join(name).exists(), "{} missing", name);
    }

    let per_hypothesis = std::fs::read_to_string(out.join("decision_per_hypothesis.csv")).unwrap();
    // header + 9 hypotheses x 4 covariates
    assert_eq!(per_hypothesis.lines().count(), 1 + 36);
}

#[test]
fn test_distances_json_output() {
    let dir = utils::narps_basedir(24);
    let output = narps(dir.path())
        .args(["distances", "--hypothesis", "2", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["command"], "distances");
    let result = &parsed["results"][0];
    assert_eq!(result["analysis"], "distance");
    assert_eq!(result["results"]["hypothesis"], 2);
    assert_eq!(result["results"]["n_rows"], 24);
    assert_eq!(result["results"]["effects"].as_array().unwrap().len(), 5);
}

#[test]
fn test_simulate_csv_output() {
    let dir = tempfile::tempdir().unwrap();
    narps(dir.path())
        .args([
            "simulate",
            "--replicates",
            "3",
            "--seed",
            "11",
            "--format",
            "csv",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("# simulation_summary"))
        .stdout(predicate::str::starts_with("# simulation_summary"))
        .stdout(predicate::str::contains("indifference"));

    assert!(dir.path().join("output/simulation_summary.csv").exists());
    assert!(dir.path().join("output/simulation_designs.csv").exists());
}

#[test]
fn test_simulate_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let config = utils::write_fast_config(dir.path());
    let run = || {
        narps(dir.path())
            .arg("--config")
            .arg(&config)
            .args(["simulate", "--format", "csv"])
            .output()
            .unwrap()
            .stdout
    };
    assert_eq!(run(), run());
}

#[test]
fn test_simulate_rejects_negative_noise() {
    let dir = tempfile::tempdir().unwrap();
    narps(dir.path())
        .args(["simulate", "--noise=-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("noise_sd"));
}

#[test]
fn test_consensus_skips_missing_hypotheses() {
    let dir = utils::narps_basedir(10);
    narps(dir.path())
        .arg("consensus")
        .assert()
        .success()
        .stdout(predicate::str::contains("hypothesis 1: 8 teams x 40 voxels"))
        .stdout(predicate::str::contains("hypothesis 2: 8 teams x 40 voxels"));

    let summary = std::fs::read_to_string(dir.path().join("output/consensus_summary.csv")).unwrap();
    assert_eq!(summary.lines().count(), 3);
}

#[test]
fn test_consensus_explicit_missing_hypothesis_fails() {
    let dir = utils::narps_basedir(10);
    narps(dir.path())
        .args(["consensus", "--hypothesis", "7"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("hypothesis 7"));
}

#[test]
fn test_missing_metadata_reports_path() {
    let dir = tempfile::tempdir().unwrap();
    narps(dir.path())
        .arg("decisions")
        .assert()
        .failure()
        .stderr(predicate::str::contains("all_metadata.csv"));
}

#[test]
fn test_invalid_hypothesis_value_in_metadata() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("metadata")).unwrap();
    std::fs::write(
        dir.path().join("metadata/all_metadata.csv"),
        format!("{}\nT001,12,1,8.0,6,SPM,Yes,FWE\n", utils::METADATA_HEADER),
    )
    .unwrap();
    narps(dir.path())
        .arg("decisions")
        .assert()
        .failure()
        .stderr(predicate::str::contains("varnum"));
}

#[test]
fn test_basedir_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let config = utils::write_fast_config(dir.path());
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("narps");
    cmd.env("NARPS_BASEDIR", dir.path())
        .arg("--config")
        .arg(&config)
        .arg("simulate")
        .assert()
        .success();
    assert!(dir.path().join("output/simulation_report.txt").exists());
}

#[test]
fn test_debug_tracing_goes_to_stderr() {
    let dir = tempfile::tempdir().unwrap();
    let config = utils::write_fast_config(dir.path());
    narps(dir.path())
        .arg("--debug")
        .arg("--config")
        .arg(&config)
        .args(["simulate", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("{"))
        .stderr(predicate::str::contains("configuration resolved"));
}
