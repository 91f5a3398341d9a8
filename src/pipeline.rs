//! Command dispatch: load inputs, run an analysis, write its outputs
//!
//! Each command produces one or more [`Outcome`]s. Outcomes know how to render
//! themselves as CSV tables, a text report and JSON; [`write_outputs`] puts the
//! tables and reports under the configured output directory.

use crate::analysis::{DecisionAnalysis, DistanceAnalysis};
use crate::cli::Command;
use crate::config::AnalysisConfig;
use crate::consensus::{self, ConsensusSummary};
use crate::csv_output::{float, opt_float, write_report, CsvTable};
use crate::data::{DistanceRecord, TeamRecord};
use crate::simulation::{self, SimulationReport};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Result of one pipeline
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "analysis", content = "results", rename_all = "snake_case")]
pub enum Outcome {
    #[serde(rename = "decision")]
    Decisions(Box<DecisionAnalysis>),
    #[serde(rename = "distance")]
    Distances(Box<DistanceAnalysis>),
    Simulation(Vec<SimulationReport>),
    Consensus(Vec<ConsensusSummary>),
}

impl Outcome {
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Decisions(_) => "decision",
            Outcome::Distances(_) => "distance",
            Outcome::Simulation(_) => "simulation",
            Outcome::Consensus(_) => "consensus",
        }
    }

    pub fn tables(&self) -> Vec<CsvTable> {
        match self {
            Outcome::Decisions(a) => a.tables(),
            Outcome::Distances(a) => a.tables(),
            Outcome::Simulation(reports) => simulation_tables(reports),
            Outcome::Consensus(summaries) => vec![consensus_table(summaries)],
        }
    }

    pub fn to_report_string(&self) -> String {
        match self {
            Outcome::Decisions(a) => a.to_report_string(),
            Outcome::Distances(a) => a.to_report_string(),
            Outcome::Simulation(reports) => reports
                .iter()
                .map(SimulationReport::to_report_string)
                .collect::<Vec<_>>()
                .join("\n"),
            Outcome::Consensus(summaries) => {
                let mut report = String::from("=== Consensus Analysis ===\n");
                if summaries.is_empty() {
                    report.push_str("No consensus matrices found\n");
                }
                for s in summaries {
                    report.push_str(&s.to_report_string());
                }
                report
            }
        }
    }
}

/// Run a command, applying its overrides to a copy of the configuration
pub fn execute(command: &Command, config: &AnalysisConfig) -> Result<Vec<Outcome>> {
    match command {
        Command::Decisions => Ok(vec![run_decisions(config)?]),
        Command::Distances { hypothesis } => {
            let mut config = config.clone();
            if let Some(h) = hypothesis {
                config.distance_hypothesis = *h;
            }
            Ok(vec![run_distances(&config)?])
        }
        Command::Simulate {
            replicates,
            noise,
            seed,
        } => {
            let mut config = config.clone();
            if let Some(r) = replicates {
                config.simulation.replicates = *r;
            }
            if let Some(n) = noise {
                config.simulation.noise_sd = *n;
            }
            if let Some(s) = seed {
                config.simulation.seed = *s;
            }
            config.validate().map_err(|e| anyhow::anyhow!(e))?;
            Ok(vec![run_simulation(&config)?])
        }
        Command::Consensus { hypotheses } => Ok(vec![run_consensus(config, hypotheses)?]),
        Command::All => Ok(vec![
            run_decisions(config)?,
            run_distances(config)?,
            run_simulation(config)?,
            run_consensus(config, &[])?,
        ]),
    }
}

pub fn run_decisions(config: &AnalysisConfig) -> Result<Outcome> {
    let records = TeamRecord::load(&config.metadata_path())?;
    let analysis = DecisionAnalysis::run(&records, config)?;
    Ok(Outcome::Decisions(Box::new(analysis)))
}

pub fn run_distances(config: &AnalysisConfig) -> Result<Outcome> {
    let records = TeamRecord::load(&config.metadata_path())?;
    let distances = DistanceRecord::load(&config.distance_path())?;
    let analysis = DistanceAnalysis::run(&records, &distances, config)?;
    Ok(Outcome::Distances(Box::new(analysis)))
}

pub fn run_simulation(config: &AnalysisConfig) -> Result<Outcome> {
    let reports = simulation::run(&config.simulation).context("Design simulation failed")?;
    Ok(Outcome::Simulation(reports))
}

/// Consensus for the requested hypotheses
///
/// With an empty request every hypothesis with a data file is analysed and
/// missing files are skipped; explicitly requested files must exist.
pub fn run_consensus(config: &AnalysisConfig, hypotheses: &[u8]) -> Result<Outcome> {
    let explicit = !hypotheses.is_empty();
    let requested: Vec<u8> = if explicit {
        hypotheses.to_vec()
    } else {
        (1..=9).collect()
    };

    let mut summaries = Vec::with_capacity(requested.len());
    for h in requested {
        let path = config.consensus_path(h);
        if !explicit && !path.exists() {
            tracing::warn!(hypothesis = h, path = %path.display(), "no consensus data, skipping");
            continue;
        }
        let data = consensus::load_matrix(&path)
            .with_context(|| format!("Failed to load consensus data for hypothesis {}", h))?;
        let result = consensus::analyze(h, &data, config.fdr_q)
            .with_context(|| format!("Consensus analysis failed for hypothesis {}", h))?;
        summaries.push(result.summary());
    }
    Ok(Outcome::Consensus(summaries))
}

/// Write every table and report, returning the paths written
pub fn write_outputs(outcomes: &[Outcome], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    let mut written = Vec::new();
    for outcome in outcomes {
        for table in outcome.tables() {
            written.push(table.write_to_dir(dir)?);
        }
        written.push(write_report(dir, outcome.name(), &outcome.to_report_string())?);
    }
    tracing::info!(files = written.len(), dir = %dir.display(), "outputs written");
    Ok(written)
}

fn simulation_tables(reports: &[SimulationReport]) -> Vec<CsvTable> {
    let mut summary = CsvTable::new(
        "simulation_summary",
        &[
            "mode",
            "lambda",
            "design",
            "replicates",
            "lambda_hat_mean",
            "lambda_hat_sd",
            "lambda_hat_median",
            "mean_gain",
            "mean_loss",
            "bias",
            "rmse",
        ],
    );
    let mut designs = CsvTable::new(
        "simulation_designs",
        &[
            "mode",
            "lambda",
            "identity_slope",
            "identity_intercept",
            "identity_r2",
            "welch_t",
            "welch_df",
            "welch_p",
        ],
    );

    for report in reports {
        for s in &report.summaries {
            summary.push_row(vec![
                report.mode.to_string(),
                float(s.lambda),
                s.design.to_string(),
                s.lambda_hat.count.to_string(),
                float(f64::from(s.lambda_hat.mean)),
                float(f64::from(s.lambda_hat.stddev)),
                float(f64::from(s.lambda_hat.median)),
                float(s.mean_gain),
                float(s.mean_loss),
                float(s.bias),
                float(s.rmse),
            ]);
        }
        let mut lambdas: Vec<f64> = report.summaries.iter().map(|s| s.lambda).collect();
        lambdas.dedup();
        for lambda in lambdas {
            let test = report
                .design_tests
                .iter()
                .find(|t| (t.lambda - lambda).abs() < 1e-12);
            designs.push_row(vec![
                report.mode.to_string(),
                float(lambda),
                opt_float(report.identity.map(|l| l.slope)),
                opt_float(report.identity.map(|l| l.intercept)),
                opt_float(report.identity.map(|l| l.r_squared)),
                test.map(|t| float(f64::from(t.statistic))).unwrap_or_else(|| "NA".into()),
                test.map(|t| float(f64::from(t.df))).unwrap_or_else(|| "NA".into()),
                test.map(|t| float(f64::from(t.p_value))).unwrap_or_else(|| "NA".into()),
            ]);
        }
    }
    vec![summary, designs]
}

fn consensus_table(summaries: &[ConsensusSummary]) -> CsvTable {
    let mut table = CsvTable::new(
        "consensus_summary",
        &[
            "hypothesis",
            "teams",
            "voxels",
            "mean",
            "variance",
            "mean_correlation",
            "fdr_significant_voxels",
            "median_tau",
            "max_tau",
        ],
    );
    for s in summaries {
        table.push_row(vec![
            s.hypothesis.to_string(),
            s.n_teams.to_string(),
            s.n_voxels.to_string(),
            float(s.grand_mean),
            float(s.mean_variance),
            float(s.mean_correlation),
            s.significant_voxels.to_string(),
            float(f64::from(s.median_tau)),
            float(f64::from(s.max_tau)),
        ]);
    }
    table
}
