// Integration test utilities
//
// Builds a synthetic NARPS base directory (metadata, pattern distances and
// consensus matrices) in a temporary directory.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

pub const METADATA_HEADER: &str =
    "teamID,varnum,Decision,fwhm,smoothing_coef,package,used_fmriprep_data,testing";

/// Metadata for `teams` teams and all nine hypotheses
///
/// Decisions follow a logistic model in smoothness and hypothesis with a
/// per-team random intercept.
pub fn metadata_csv(seed: u64, teams: usize) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let packages = ["SPM", "FSL", "AFNI", "nistats"];
    let testing = ["FWE", "FDR", "randomise", "other"];
    let mut out = String::from(METADATA_HEADER);
    out.push('\n');
    for t in 0..teams {
        let team_effect: f64 = rng.gen_range(-1.0..1.0);
        let smoothness: f64 = rng.gen_range(5.0..14.0);
        let kernel = [4.0, 5.0, 6.0, 8.0][(t / 3) % 4];
        let package = packages[t % packages.len()];
        let pipeline = if t % 3 == 0 { "Yes" } else { "No" };
        let test = testing[(t / 4) % testing.len()];
        for h in 1..=9u8 {
            let eta = -3.2 + 0.3 * smoothness + 0.15 * f64::from(h) + team_effect;
            let prob = 1.0 / (1.0 + (-eta).exp());
            let decision = u8::from(rng.gen::<f64>() < prob);
            let fwhm = smoothness + rng.gen_range(-0.5..0.5);
            let _ = writeln!(
                out,
                "T{:03},{},{},{:.3},{},{},{},{}",
                t, h, decision, fwhm, kernel, package, pipeline, test
            );
        }
    }
    out
}

/// Mean pattern distance per team, related to the team's smoothness
pub fn distance_csv(metadata: &str) -> String {
    let mut out = String::from("teamID,mean_distance\n");
    let mut seen = std::collections::BTreeSet::new();
    for (i, line) in metadata.lines().skip(1).enumerate() {
        let fields: Vec<&str> = line.split(',').collect();
        if !seen.insert(fields[0].to_string()) {
            continue;
        }
        let fwhm: f64 = fields[3].parse().unwrap_or(8.0);
        let shift = if fields[5] == "AFNI" { 0.1 } else { 0.0 };
        let jitter = [0.02, -0.03, 0.01, 0.0, -0.01][i % 5];
        let _ = writeln!(out, "{},{:.4}", fields[0], 0.7 - 0.03 * fwhm + shift + jitter);
    }
    out
}

/// Teams x voxels matrix sharing a common signal plus team noise
pub fn consensus_csv(seed: u64, teams: usize, voxels: usize) -> String {
    let mut rng = StdRng::seed_from_u64(seed);
    let signal: Vec<f64> = (0..voxels)
        .map(|v| if v < voxels / 2 { 2.0 } else { 0.0 } + rng.gen_range(-0.5..0.5))
        .collect();
    let mut out = String::new();
    for _ in 0..teams {
        let row: Vec<String> = signal
            .iter()
            .map(|s| format!("{:.4}", s + rng.gen_range(-1.0..1.0)))
            .collect();
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Base directory with metadata and consensus data for hypotheses 1 and 2
pub fn narps_basedir(teams: usize) -> TempDir {
    let dir = tempfile::tempdir().expect("create temp dir");
    write_basedir(dir.path(), teams);
    dir
}

pub fn write_basedir(root: &Path, teams: usize) {
    let metadata = metadata_csv(7, teams);
    fs::create_dir_all(root.join("metadata")).expect("create metadata dir");
    fs::write(root.join("metadata/all_metadata.csv"), &metadata).expect("write metadata");
    fs::write(
        root.join("metadata/mean_pattern_distance.csv"),
        distance_csv(&metadata),
    )
    .expect("write distances");

    fs::create_dir_all(root.join("consensus")).expect("create consensus dir");
    for h in 1..=2u64 {
        fs::write(
            root.join(format!("consensus/hypo{}_data.csv", h)),
            consensus_csv(h, 8, 40),
        )
        .expect("write consensus data");
    }
}

/// Small, fast simulation settings
pub fn write_fast_config(root: &Path) -> std::path::PathBuf {
    let path = root.join("narps.toml");
    fs::write(
        &path,
        "[simulation]\nlambda_start = 1.0\nlambda_stop = 2.0\nlambda_step = 1.0\nreplicates = 4\n",
    )
    .expect("write config");
    path
}
