// Result-pattern distance as a function of analytic choices
//
// One row per team: the team's metadata for a single hypothesis joined to its
// Fisher-Z transformed mean pattern distance. Within one hypothesis the
// hypothesis factor is constant, so the kernel size takes its place.

use super::{effects_table, factor_posthoc, posthoc_table, write_effects, write_posthoc};
use crate::config::AnalysisConfig;
use crate::csv_output::{float, CsvTable};
use crate::data::{DistanceRecord, TeamRecord};
use crate::model::{
    omission_analysis, Coefficient, Covariate, CovariateSource, CovariateValue, FittedModel,
    OmissionComparison, OrdinaryLeastSquares, PostHoc,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Team metadata joined to its pattern distance
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceObservation {
    pub record: TeamRecord,
    pub fisher_z: f64,
}

impl DistanceObservation {
    /// Join distances to the metadata rows of one hypothesis
    ///
    /// Teams without a distance row are left out; when a team appears more
    /// than once in the distance file the first row wins.
    pub fn join(
        records: &[TeamRecord],
        distances: &[DistanceRecord],
        hypothesis: u8,
    ) -> Vec<DistanceObservation> {
        let mut by_team: HashMap<&str, f64> = HashMap::with_capacity(distances.len());
        for d in distances {
            by_team.entry(d.team.as_str()).or_insert(d.fisher_z);
        }
        records
            .iter()
            .filter(|r| r.hypothesis == hypothesis)
            .filter_map(|r| {
                by_team.get(r.team.as_str()).map(|&z| DistanceObservation {
                    record: r.clone(),
                    fisher_z: z,
                })
            })
            .collect()
    }

    pub fn response(&self) -> f64 {
        self.fisher_z
    }
}

impl CovariateSource for DistanceObservation {
    fn team(&self) -> &str {
        &self.record.team
    }

    fn covariate(&self, covariate: Covariate) -> Option<CovariateValue> {
        self.record.covariate(covariate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceAnalysis {
    pub hypothesis: u8,
    /// Teams joined before dropping incomplete rows
    pub joined: usize,
    pub n_rows: usize,
    pub coefficients: Vec<Coefficient>,
    pub r_squared: f64,
    pub adjusted_r_squared: f64,
    pub log_likelihood: f64,
    pub effects: Vec<OmissionComparison>,
    pub skipped: Vec<Covariate>,
    pub posthoc: Vec<PostHoc>,
}

impl DistanceAnalysis {
    pub fn run(
        records: &[TeamRecord],
        distances: &[DistanceRecord],
        config: &AnalysisConfig,
    ) -> Result<Self> {
        let hypothesis = config.distance_hypothesis;
        let joined = DistanceObservation::join(records, distances, hypothesis);
        let rows: Vec<DistanceObservation> = joined
            .iter()
            .filter(|o| o.is_complete(&Covariate::DISTANCE))
            .cloned()
            .collect();
        tracing::info!(
            hypothesis,
            joined = joined.len(),
            complete = rows.len(),
            "pattern distance rows"
        );

        let analysis = omission_analysis(
            &OrdinaryLeastSquares,
            &rows,
            &Covariate::DISTANCE,
            DistanceObservation::response,
        )
        .context("Pattern distance model failed")?;

        let posthoc = factor_posthoc(&analysis.full, &analysis.frame, config.significance_level);
        Ok(Self {
            hypothesis,
            joined: joined.len(),
            n_rows: analysis.frame.n_rows(),
            coefficients: analysis.full.coefficients().to_vec(),
            r_squared: analysis.full.r2(),
            adjusted_r_squared: analysis.full.adjusted_r2(),
            log_likelihood: analysis.full.log_likelihood(),
            effects: analysis.comparisons,
            skipped: analysis.skipped,
            posthoc,
        })
    }

    pub fn tables(&self) -> Vec<CsvTable> {
        let mut coefficients = CsvTable::new(
            "distance_coefficients",
            &["term", "estimate", "std_error", "t", "p_value"],
        );
        for c in &self.coefficients {
            coefficients.push_row(vec![
                c.name.clone(),
                float(c.estimate),
                float(c.std_error),
                float(c.statistic),
                float(c.p_value),
            ]);
        }
        vec![
            effects_table("distance_effects", &self.effects),
            coefficients,
            posthoc_table("distance_posthoc", &self.posthoc),
        ]
    }

    pub fn to_report_string(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(
            report,
            "=== Pattern Distance Model (OLS, hypothesis {}) ===",
            self.hypothesis
        );
        let _ = writeln!(
            report,
            "Teams: {} joined, {} complete",
            self.joined, self.n_rows
        );
        let _ = writeln!(
            report,
            "R2: {:.4}  adjusted R2: {:.4}  logLik: {:.3}",
            self.r_squared, self.adjusted_r_squared, self.log_likelihood
        );
        let _ = writeln!(report);
        for c in &self.coefficients {
            let _ = writeln!(
                report,
                "{:<24} {:>10.4} (SE {:.4})  t = {:>7.3}  p = {:.4}",
                c.name, c.estimate, c.std_error, c.statistic, c.p_value
            );
        }
        let _ = writeln!(report);
        let _ = writeln!(report, "Leave-one-out model comparisons:");
        write_effects(&mut report, &self.effects);
        for s in &self.skipped {
            let _ = writeln!(report, "  {} skipped (single level)", s);
        }
        write_posthoc(&mut report, &self.posthoc);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::decision::tests::synthetic_records;
    use crate::stats::fisher_z;

    fn distances_for(records: &[TeamRecord]) -> Vec<DistanceRecord> {
        let mut seen = std::collections::BTreeSet::new();
        records
            .iter()
            .filter(|r| seen.insert(r.team.clone()))
            .enumerate()
            .map(|(i, r)| {
                // Smoother maps sit closer together, plus a package shift
                let shift = if r.package.map(|p| p.as_str()) == Some("AFNI") { 0.1 } else { 0.0 };
                let jitter = [0.02, -0.03, 0.01, 0.0, -0.01][i % 5];
                let raw = 0.7 - 0.03 * r.smoothness.unwrap_or(8.0) + shift + jitter;
                DistanceRecord {
                    team: r.team.clone(),
                    raw,
                    fisher_z: fisher_z(raw),
                }
            })
            .collect()
    }

    #[test]
    fn test_join_restricts_to_hypothesis() {
        let records = synthetic_records(1, 10);
        let distances = distances_for(&records);
        let joined = DistanceObservation::join(&records, &distances, 2);
        assert_eq!(joined.len(), 10);
        assert!(joined.iter().all(|o| o.record.hypothesis == 2));
    }

    #[test]
    fn test_join_drops_teams_without_distance() {
        let records = synthetic_records(1, 10);
        let mut distances = distances_for(&records);
        distances.retain(|d| d.team != "T003");
        let joined = DistanceObservation::join(&records, &distances, 1);
        assert_eq!(joined.len(), 9);
    }

    #[test]
    fn test_distance_analysis() {
        let records = synthetic_records(4, 40);
        let distances = distances_for(&records);
        let analysis =
            DistanceAnalysis::run(&records, &distances, &AnalysisConfig::default()).unwrap();

        assert_eq!(analysis.hypothesis, 1);
        assert_eq!(analysis.n_rows, 40);
        assert_eq!(analysis.effects.len(), 5);
        for e in &analysis.effects {
            assert!(e.reduced_params < e.full_params);
            assert!(e.lrt.statistic >= 0.0);
            assert!(e.delta_adjusted().is_some());
        }
        let smoothness = analysis
            .effects
            .iter()
            .find(|e| e.covariate == Covariate::Smoothness)
            .unwrap();
        assert!(smoothness.lrt.p_value < 0.001);
        assert!(smoothness.delta_marginal() > 0.0);

        let tables = analysis.tables();
        assert_eq!(tables[0].name, "distance_effects");
        assert_eq!(tables[0].len(), 5);
        assert!(analysis.to_report_string().contains("Pattern Distance Model"));
    }

    #[test]
    fn test_incomplete_rows_excluded() {
        let mut records = synthetic_records(4, 30);
        for r in records.iter_mut().filter(|r| r.team == "T000") {
            r.kernel_size = None;
        }
        let distances = distances_for(&records);
        let analysis =
            DistanceAnalysis::run(&records, &distances, &AnalysisConfig::default()).unwrap();
        assert_eq!(analysis.joined, 30);
        assert_eq!(analysis.n_rows, 29);
    }
}
