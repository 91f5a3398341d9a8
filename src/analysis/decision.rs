// Hypothesis decisions as a function of analytic choices
//
// Three layers:
// 1. Full mixed logistic model over all hypotheses with a random intercept
//    per team, plus one leave-one-covariate-out refit per covariate.
// 2. Single-covariate mixed models against the intercept-only model.
// 3. Per-hypothesis regularised logistic models (no random effect, one row
//    per team), collected into a hypotheses x covariates table of p-values.
//    No multiple-testing correction is applied to that table; the report
//    only flags whether anything reaches the Bonferroni level.

use super::{
    effects_table, factor_posthoc, posthoc_table, write_effects, write_posthoc, OddsRatio,
};
use crate::config::AnalysisConfig;
use crate::csv_output::{float, CsvTable};
use crate::data::{drop_incomplete, TeamRecord};
use crate::model::optim::OptimizerKind;
use crate::model::{
    compare_to_null, omission_analysis, Coefficient, Covariate, FittedModel, MixedLogistic,
    OmissionComparison, PenalizedLogistic, PostHoc, RSquared,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Write as _;

pub const HYPOTHESES: std::ops::RangeInclusive<u8> = 1..=9;

/// Full mixed model summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixedModelSummary {
    pub coefficients: Vec<Coefficient>,
    pub odds_ratios: Vec<OddsRatio>,
    /// Random-intercept standard deviation
    pub team_sd: f64,
    pub log_likelihood: f64,
    pub n_params: usize,
    pub r_squared: RSquared,
    pub optimizer: OptimizerKind,
    pub used_fallback: bool,
}

/// One single-covariate mixed model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnivariateResult {
    pub covariate: Covariate,
    pub n_rows: usize,
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
    pub odds_ratios: Vec<OddsRatio>,
}

/// Omission tests within one hypothesis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HypothesisResult {
    pub hypothesis: u8,
    pub n_rows: usize,
    pub comparisons: Vec<OmissionComparison>,
    pub skipped: Vec<Covariate>,
    /// Set when the hypothesis could not be analysed
    pub error: Option<String>,
}

impl HypothesisResult {
    pub fn p_value(&self, covariate: Covariate) -> Option<f64> {
        self.comparisons
            .iter()
            .find(|c| c.covariate == covariate)
            .map(|c| c.lrt.p_value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionAnalysis {
    pub n_rows: usize,
    pub dropped_rows: usize,
    pub n_teams: usize,
    pub full: MixedModelSummary,
    pub effects: Vec<OmissionComparison>,
    pub skipped: Vec<Covariate>,
    pub posthoc: Vec<PostHoc>,
    pub univariate: Vec<UnivariateResult>,
    pub per_hypothesis: Vec<HypothesisResult>,
    pub significance_level: f64,
    /// `significance_level / (hypotheses x covariates)`
    pub bonferroni_level: f64,
}

impl DecisionAnalysis {
    pub fn run(records: &[TeamRecord], config: &AnalysisConfig) -> Result<Self> {
        let family = MixedLogistic::new(config.glmm.clone());
        let level = 1.0 - config.significance_level;

        let (rows, dropped_rows) = drop_incomplete(records, &Covariate::DECISION);
        tracing::info!(rows = rows.len(), dropped = dropped_rows, "decision model rows");

        let analysis = omission_analysis(&family, &rows, &Covariate::DECISION, TeamRecord::response)
            .context("Full decision model failed")?;
        if analysis.full.used_fallback {
            tracing::warn!("decision model needed the Nelder-Mead fallback");
        }
        let full = MixedModelSummary {
            coefficients: analysis.full.coefficients().to_vec(),
            odds_ratios: analysis
                .full
                .coefficients()
                .iter()
                .map(|c| OddsRatio::from_coefficient(c, level))
                .collect(),
            team_sd: analysis.full.theta,
            log_likelihood: analysis.full.log_likelihood(),
            n_params: analysis.full.n_params(),
            r_squared: analysis.full.r_squared(),
            optimizer: analysis.full.optimizer,
            used_fallback: analysis.full.used_fallback,
        };
        let posthoc = factor_posthoc(&analysis.full, &analysis.frame, config.significance_level);

        let mut univariate = Vec::with_capacity(Covariate::UNIVARIATE.len());
        for covariate in Covariate::UNIVARIATE {
            let (uni_rows, _) = drop_incomplete(records, &[covariate]);
            let cmp = compare_to_null(&family, &uni_rows, covariate, TeamRecord::response)
                .with_context(|| format!("Univariate model for {} failed", covariate))?;
            univariate.push(UnivariateResult {
                covariate,
                n_rows: uni_rows.len(),
                statistic: cmp.lrt.statistic,
                df: cmp.lrt.df,
                p_value: cmp.lrt.p_value,
                odds_ratios: cmp
                    .fit
                    .coefficients()
                    .iter()
                    .skip(1)
                    .map(|c| OddsRatio::from_coefficient(c, level))
                    .collect(),
            });
        }

        let per_hypothesis = HYPOTHESES
            .map(|h| fit_hypothesis(records, h, config.prior_scale))
            .collect();

        let tests = HYPOTHESES.count() * Covariate::SUBGROUP.len();
        Ok(Self {
            n_rows: analysis.frame.n_rows(),
            dropped_rows,
            n_teams: analysis.frame.n_groups(),
            full,
            effects: analysis.comparisons,
            skipped: analysis.skipped,
            posthoc,
            univariate,
            per_hypothesis,
            significance_level: config.significance_level,
            bonferroni_level: config.significance_level / tests as f64,
        })
    }

    /// Smallest p-value of the per-hypothesis table, if any test ran
    pub fn min_per_hypothesis_p(&self) -> Option<f64> {
        self.per_hypothesis
            .iter()
            .flat_map(|h| h.comparisons.iter().map(|c| c.lrt.p_value))
            .filter(|p| p.is_finite())
            .min_by(f64::total_cmp)
    }

    pub fn tables(&self) -> Vec<CsvTable> {
        let mut coefficients = CsvTable::new(
            "decision_coefficients",
            &[
                "term",
                "estimate",
                "std_error",
                "z",
                "p_value",
                "odds_ratio",
                "ci_lower",
                "ci_upper",
            ],
        );
        for (c, or) in self.full.coefficients.iter().zip(&self.full.odds_ratios) {
            coefficients.push_row(vec![
                c.name.clone(),
                float(c.estimate),
                float(c.std_error),
                float(c.statistic),
                float(c.p_value),
                float(or.odds_ratio),
                float(or.lower),
                float(or.upper),
            ]);
        }

        let mut univariate = CsvTable::new(
            "decision_univariate",
            &[
                "covariate",
                "term",
                "odds_ratio",
                "ci_lower",
                "ci_upper",
                "wald_p_value",
                "lrt_statistic",
                "df",
                "lrt_p_value",
            ],
        );
        for u in &self.univariate {
            for or in &u.odds_ratios {
                univariate.push_row(vec![
                    u.covariate.to_string(),
                    or.term.clone(),
                    float(or.odds_ratio),
                    float(or.lower),
                    float(or.upper),
                    float(or.p_value),
                    float(u.statistic),
                    u.df.to_string(),
                    float(u.p_value),
                ]);
            }
        }

        let mut per_hypothesis = CsvTable::new(
            "decision_per_hypothesis",
            &["hypothesis", "covariate", "lrt_statistic", "df", "p_value"],
        );
        for h in &self.per_hypothesis {
            for covariate in Covariate::SUBGROUP {
                let cmp = h.comparisons.iter().find(|c| c.covariate == covariate);
                per_hypothesis.push_row(vec![
                    h.hypothesis.to_string(),
                    covariate.to_string(),
                    cmp.map(|c| float(c.lrt.statistic)).unwrap_or_else(|| "NA".into()),
                    cmp.map(|c| c.lrt.df.to_string()).unwrap_or_else(|| "NA".into()),
                    cmp.map(|c| float(c.lrt.p_value)).unwrap_or_else(|| "NA".into()),
                ]);
            }
        }

        vec![
            effects_table("decision_effects", &self.effects),
            coefficients,
            univariate,
            per_hypothesis,
            posthoc_table("decision_posthoc", &self.posthoc),
        ]
    }

    pub fn to_report_string(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "=== Decision Model (binomial GLMM, random intercept per team) ===");
        let _ = writeln!(
            report,
            "Rows: {} ({} teams), dropped for missing values: {}",
            self.n_rows, self.n_teams, self.dropped_rows
        );
        let _ = writeln!(
            report,
            "Team SD: {:.4}  logLik: {:.3}  R2m: {:.4}  R2c: {:.4}  optimizer: {}{}",
            self.full.team_sd,
            self.full.log_likelihood,
            self.full.r_squared.marginal,
            self.full.r_squared.conditional,
            self.full.optimizer,
            if self.full.used_fallback { " (fallback)" } else { "" }
        );
        let _ = writeln!(report);
        let _ = writeln!(report, "{:<24} {:>10} {:>10} {:>20}", "term", "OR", "p", "95% CI");
        for or in &self.full.odds_ratios {
            let _ = writeln!(
                report,
                "{:<24} {:>10.4} {:>10.4}   [{:.4}, {:.4}]",
                or.term, or.odds_ratio, or.p_value, or.lower, or.upper
            );
        }

        let _ = writeln!(report);
        let _ = writeln!(report, "Leave-one-out model comparisons:");
        write_effects(&mut report, &self.effects);
        for s in &self.skipped {
            let _ = writeln!(report, "  {} skipped (single level)", s);
        }
        write_posthoc(&mut report, &self.posthoc);

        let _ = writeln!(report);
        let _ = writeln!(report, "Single-covariate models vs. intercept-only:");
        for u in &self.univariate {
            let _ = writeln!(
                report,
                "  {:<12} LRT {:>8.3} df {} p {:.4}  (n = {})",
                u.covariate.to_string(),
                u.statistic,
                u.df,
                u.p_value,
                u.n_rows
            );
        }

        let _ = writeln!(report);
        let _ = writeln!(report, "Per-hypothesis models (p-values, uncorrected):");
        let _ = write!(report, "{:<6}", "hyp");
        for c in Covariate::SUBGROUP {
            let _ = write!(report, " {:>11}", c.to_string());
        }
        let _ = writeln!(report);
        for h in &self.per_hypothesis {
            let _ = write!(report, "{:<6}", h.hypothesis);
            for c in Covariate::SUBGROUP {
                match h.p_value(c) {
                    Some(p) => {
                        let _ = write!(report, " {:>11.4}", p);
                    }
                    None => {
                        let _ = write!(report, " {:>11}", "NA");
                    }
                }
            }
            if let Some(err) = &h.error {
                let _ = write!(report, "  ({})", err);
            }
            let _ = writeln!(report);
        }
        match self.min_per_hypothesis_p() {
            Some(p) if p < self.bonferroni_level => {
                let _ = writeln!(
                    report,
                    "Smallest p = {:.4} is below the Bonferroni level {:.5}",
                    p, self.bonferroni_level
                );
            }
            Some(p) => {
                let _ = writeln!(
                    report,
                    "No p-value reaches the Bonferroni level {:.5} (smallest {:.4})",
                    self.bonferroni_level, p
                );
            }
            None => {
                let _ = writeln!(report, "No per-hypothesis tests could be run");
            }
        }
        report
    }
}

/// Regularised logistic omission tests for one hypothesis
fn fit_hypothesis(records: &[TeamRecord], hypothesis: u8, prior_scale: f64) -> HypothesisResult {
    let subset: Vec<TeamRecord> = records
        .iter()
        .filter(|r| r.hypothesis == hypothesis)
        .cloned()
        .collect();
    let (rows, _) = drop_incomplete(&subset, &Covariate::SUBGROUP);
    let family = PenalizedLogistic::with_prior(prior_scale);

    match omission_analysis(&family, &rows, &Covariate::SUBGROUP, TeamRecord::response) {
        Ok(analysis) => HypothesisResult {
            hypothesis,
            n_rows: rows.len(),
            comparisons: analysis.comparisons,
            skipped: analysis.skipped,
            error: None,
        },
        Err(e) => {
            tracing::warn!(hypothesis, error = %e, "per-hypothesis model failed");
            HypothesisResult {
                hypothesis,
                n_rows: rows.len(),
                comparisons: Vec::new(),
                skipped: Vec::new(),
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::data::Package;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Synthetic metadata: decisions depend on smoothness and hypothesis
    pub(crate) fn synthetic_records(seed: u64, teams: usize) -> Vec<TeamRecord> {
        let mut rng = StdRng::seed_from_u64(seed);
        let packages = [Package::Spm, Package::Fsl, Package::Afni, Package::Other];
        let testing = ["FWE", "FDR", "randomise", "other"];
        let mut records = Vec::new();
        for t in 0..teams {
            let team_effect: f64 = rng.gen_range(-1.0..1.0);
            let smoothness: f64 = rng.gen_range(5.0..14.0);
            let kernel = [4.0, 5.0, 6.0, 8.0][(t / 3) % 4];
            let package = packages[t % packages.len()];
            let pipeline = t % 3 == 0;
            let test = testing[(t / 4) % testing.len()];
            for h in HYPOTHESES {
                let eta = -3.2 + 0.3 * smoothness + 0.15 * f64::from(h) + team_effect;
                let prob = 1.0 / (1.0 + (-eta).exp());
                records.push(TeamRecord {
                    team: format!("T{:03}", t),
                    hypothesis: h,
                    decision: Some(rng.gen::<f64>() < prob),
                    smoothness: Some(smoothness + rng.gen_range(-0.5..0.5)),
                    kernel_size: Some(kernel),
                    package: Some(package),
                    pipeline: Some(pipeline),
                    testing: Some(test.to_string()),
                });
            }
        }
        records
    }

    #[test]
    fn test_decision_analysis_shape() {
        let mut records = synthetic_records(3, 40);
        records[0].smoothness = None;
        records[1].decision = None;
        let config = AnalysisConfig::default();
        let analysis = DecisionAnalysis::run(&records, &config).unwrap();

        assert_eq!(analysis.dropped_rows, 2);
        assert_eq!(analysis.n_rows, records.len() - 2);
        assert_eq!(analysis.n_teams, 40);
        assert_eq!(analysis.effects.len(), 5);
        assert_eq!(analysis.univariate.len(), 6);
        assert_eq!(analysis.per_hypothesis.len(), 9);
        for e in &analysis.effects {
            assert!(e.reduced_params < e.full_params);
            assert!(e.lrt.statistic >= 0.0);
        }
        // hypothesis (9 levels), package (4) and testing (4) get post-hoc tables
        assert_eq!(analysis.posthoc.len(), 3);
        assert!((analysis.bonferroni_level - 0.05 / 36.0).abs() < 1e-15);

        let smoothness = analysis
            .effects
            .iter()
            .find(|e| e.covariate == Covariate::Smoothness)
            .unwrap();
        assert!(smoothness.lrt.p_value < 0.01);
    }

    #[test]
    fn test_decision_tables_and_report() {
        let records = synthetic_records(8, 30);
        let analysis = DecisionAnalysis::run(&records, &AnalysisConfig::default()).unwrap();
        let tables = analysis.tables();
        let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "decision_effects",
                "decision_coefficients",
                "decision_univariate",
                "decision_per_hypothesis",
                "decision_posthoc"
            ]
        );
        assert_eq!(tables[0].len(), 5);
        assert_eq!(tables[3].len(), 9 * 4);

        let report = analysis.to_report_string();
        assert!(report.contains("Decision Model"));
        assert!(report.contains("Bonferroni"));
        assert!(report.contains("smoothness"));
    }

    #[test]
    fn test_failed_hypothesis_is_isolated() {
        let mut records = synthetic_records(5, 30);
        // Hypothesis 4 loses every row
        for r in records.iter_mut().filter(|r| r.hypothesis == 4) {
            r.testing = None;
        }
        let analysis = DecisionAnalysis::run(&records, &AnalysisConfig::default()).unwrap();
        let h4 = &analysis.per_hypothesis[3];
        assert_eq!(h4.hypothesis, 4);
        assert!(h4.error.is_some());
        assert!(h4.comparisons.is_empty());
        assert!(analysis.per_hypothesis[4].error.is_none());
    }
}
