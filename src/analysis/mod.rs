//! Analysis pipelines relating analytic choices to team outcomes
//!
//! - [`decision`]: binary hypothesis decisions (mixed logistic models)
//! - [`distance`]: mean result-pattern distance (least squares)
//!
//! Both follow the same shape: drop incomplete rows, fit the full model,
//! refit once per omitted covariate, then add post-hoc comparisons for
//! multi-level factors.

pub mod decision;
pub mod distance;

pub use decision::{DecisionAnalysis, HypothesisResult, UnivariateResult};
pub use distance::{DistanceAnalysis, DistanceObservation};

use crate::csv_output::{float, opt_float, CsvTable};
use crate::model::{
    estimated_marginal_means, Coefficient, CovariateKind, FittedModel, ModelFrame,
    OmissionComparison, PostHoc,
};
use serde::Serialize;
use std::fmt::Write as _;

/// Exponentiated logistic coefficient with its Wald interval
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OddsRatio {
    pub term: String,
    pub odds_ratio: f64,
    pub lower: f64,
    pub upper: f64,
    pub p_value: f64,
}

impl OddsRatio {
    pub fn from_coefficient(coefficient: &Coefficient, level: f64) -> Self {
        let (lower, upper) = coefficient.confidence_interval(level);
        Self {
            term: coefficient.name.clone(),
            odds_ratio: coefficient.estimate.exp(),
            lower: lower.exp(),
            upper: upper.exp(),
            p_value: coefficient.p_value,
        }
    }
}

/// Post-hoc summaries for every factor with more than two levels
pub(crate) fn factor_posthoc<F: FittedModel>(
    fit: &F,
    frame: &ModelFrame,
    alpha: f64,
) -> Vec<PostHoc> {
    frame
        .terms
        .iter()
        .filter(|t| t.covariate.kind() == CovariateKind::Factor && t.levels.len() > 2)
        .filter_map(|t| match estimated_marginal_means(fit, frame, t.covariate, alpha) {
            Ok(posthoc) => Some(posthoc),
            Err(e) => {
                tracing::warn!(covariate = %t.covariate, error = %e, "post-hoc comparison failed");
                None
            }
        })
        .collect()
}

pub(crate) fn effects_table(name: &str, comparisons: &[OmissionComparison]) -> CsvTable {
    let mut table = CsvTable::new(
        name,
        &[
            "covariate",
            "full_params",
            "reduced_params",
            "lrt_statistic",
            "df",
            "p_value",
            "delta_r2_marginal",
            "delta_r2_conditional",
            "delta_r2_adjusted",
        ],
    );
    for c in comparisons {
        table.push_row(vec![
            c.covariate.to_string(),
            c.full_params.to_string(),
            c.reduced_params.to_string(),
            float(c.lrt.statistic),
            c.lrt.df.to_string(),
            float(c.lrt.p_value),
            float(c.delta_marginal()),
            float(c.delta_conditional()),
            opt_float(c.delta_adjusted()),
        ]);
    }
    table
}

pub(crate) fn posthoc_table(name: &str, posthoc: &[PostHoc]) -> CsvTable {
    let mut table = CsvTable::new(
        name,
        &["covariate", "level", "estimate", "std_error", "group"],
    );
    for ph in posthoc {
        for level in &ph.levels {
            table.push_row(vec![
                ph.covariate.to_string(),
                level.level.clone(),
                float(level.estimate),
                float(level.std_error),
                level.group.clone(),
            ]);
        }
    }
    table
}

pub(crate) fn write_effects(report: &mut String, comparisons: &[OmissionComparison]) {
    let _ = writeln!(
        report,
        "{:<14} {:>6} {:>10} {:>4} {:>10} {:>10} {:>10}",
        "omitted", "params", "LRT", "df", "p", "dR2m", "dR2c"
    );
    for c in comparisons {
        let _ = writeln!(
            report,
            "{:<14} {:>6} {:>10.3} {:>4} {:>10.4} {:>10.4} {:>10.4}{}",
            c.covariate.to_string(),
            c.reduced_params,
            c.lrt.statistic,
            c.lrt.df,
            c.lrt.p_value,
            c.delta_marginal(),
            c.delta_conditional(),
            c.delta_adjusted()
                .map(|d| format!("  (adj {:+.4})", d))
                .unwrap_or_default()
        );
    }
}

pub(crate) fn write_posthoc(report: &mut String, posthoc: &[PostHoc]) {
    for ph in posthoc {
        let _ = writeln!(report, "Post-hoc: {}", ph.covariate);
        for level in &ph.levels {
            let _ = writeln!(
                report,
                "  {:<10} {:>9.4} (SE {:.4})  {}",
                level.level, level.estimate, level.std_error, level.group
            );
        }
        for c in &ph.contrasts {
            let _ = writeln!(
                report,
                "  {} - {}: {:+.4}, p = {:.4} (Holm {:.4})",
                c.first, c.second, c.estimate, c.p_value, c.adjusted_p_value
            );
        }
    }
}
