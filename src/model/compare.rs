// Nested model comparison
//
// The omission procedure fits the full model once, then one reduced model per
// covariate with exactly that covariate (all of its columns) removed and every
// other covariate unchanged. All models are fitted to the same rows, so the
// likelihood-ratio statistics are comparable.

use super::{
    Covariate, CovariateSource, FitError, FittedModel, ModelFamily, ModelFrame, RSquared, Result,
};
use serde::Serialize;

/// Likelihood-ratio test between nested models
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LikelihoodRatioTest {
    /// `2 * (ll_full - ll_reduced)`, clamped at zero
    pub statistic: f64,
    pub df: usize,
    pub p_value: f64,
}

/// Compare a full model against a nested reduced model
///
/// Numerical noise can push the reduced log-likelihood marginally above the
/// full one; the statistic is clamped at zero in that case.
pub fn likelihood_ratio_test<F, R>(full: &F, reduced: &R) -> Result<LikelihoodRatioTest>
where
    F: FittedModel,
    R: FittedModel,
{
    let full_params = full.n_params();
    let reduced_params = reduced.n_params();
    if reduced_params >= full_params {
        return Err(FitError::InvalidInput(format!(
            "reduced model must have fewer parameters ({} >= {})",
            reduced_params, full_params
        )));
    }

    let statistic = (2.0 * (full.log_likelihood() - reduced.log_likelihood())).max(0.0);
    let df = full_params - reduced_params;
    Ok(LikelihoodRatioTest {
        statistic,
        df,
        p_value: crate::stats::chi_squared_sf(statistic, df as f64),
    })
}

/// Contribution of one covariate to the full model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OmissionComparison {
    pub covariate: Covariate,
    pub full_params: usize,
    pub reduced_params: usize,
    pub lrt: LikelihoodRatioTest,
    pub full_r_squared: RSquared,
    pub reduced_r_squared: RSquared,
}

impl OmissionComparison {
    /// Drop in marginal R² when the covariate is removed
    pub fn delta_marginal(&self) -> f64 {
        self.full_r_squared.marginal - self.reduced_r_squared.marginal
    }

    /// Drop in conditional R² when the covariate is removed
    pub fn delta_conditional(&self) -> f64 {
        self.full_r_squared.conditional - self.reduced_r_squared.conditional
    }

    /// Drop in adjusted R² (least-squares models only)
    pub fn delta_adjusted(&self) -> Option<f64> {
        match (self.full_r_squared.adjusted, self.reduced_r_squared.adjusted) {
            (Some(full), Some(reduced)) => Some(full - reduced),
            _ => None,
        }
    }
}

/// Full model plus one comparison per omitted covariate
#[derive(Debug, Clone)]
pub struct OmissionAnalysis<F> {
    pub frame: ModelFrame,
    pub full: F,
    pub comparisons: Vec<OmissionComparison>,
    /// Covariates without columns on these rows (single observed level)
    pub skipped: Vec<Covariate>,
}

/// Fit the full model and every leave-one-covariate-out model
pub fn omission_analysis<M, T, Y>(
    family: &M,
    rows: &[T],
    covariates: &[Covariate],
    response: Y,
) -> Result<OmissionAnalysis<M::Fit>>
where
    M: ModelFamily,
    T: CovariateSource,
    Y: Fn(&T) -> f64 + Copy,
{
    let frame = ModelFrame::build(rows, covariates, response)?;
    let full = family.fit(&frame)?;
    tracing::debug!(
        family = family.name(),
        rows = frame.n_rows(),
        params = full.n_params(),
        "full model fitted"
    );

    let mut comparisons = Vec::with_capacity(covariates.len());
    let mut skipped = Vec::new();
    for &omitted in covariates {
        let width = frame.term(omitted).map(|t| t.width()).unwrap_or(0);
        if width == 0 {
            tracing::warn!(
                covariate = %omitted,
                "covariate has a single level on these rows, skipping its comparison"
            );
            skipped.push(omitted);
            continue;
        }

        let kept: Vec<Covariate> = covariates
            .iter()
            .copied()
            .filter(|&c| c != omitted)
            .collect();
        let reduced_frame = ModelFrame::build(rows, &kept, response)?;
        let reduced = family.fit(&reduced_frame)?;
        let lrt = likelihood_ratio_test(&full, &reduced)?;
        tracing::debug!(
            covariate = %omitted,
            statistic = lrt.statistic,
            p_value = lrt.p_value,
            "omission comparison"
        );

        comparisons.push(OmissionComparison {
            covariate: omitted,
            full_params: full.n_params(),
            reduced_params: reduced.n_params(),
            lrt,
            full_r_squared: full.r_squared(),
            reduced_r_squared: reduced.r_squared(),
        });
    }

    Ok(OmissionAnalysis {
        frame,
        full,
        comparisons,
        skipped,
    })
}

/// Single-covariate model compared with the intercept-only model
#[derive(Debug, Clone)]
pub struct UnivariateComparison<F> {
    pub covariate: Covariate,
    pub fit: F,
    pub lrt: LikelihoodRatioTest,
}

/// Fit `response ~ covariate` and test it against `response ~ 1`
pub fn compare_to_null<M, T, Y>(
    family: &M,
    rows: &[T],
    covariate: Covariate,
    response: Y,
) -> Result<UnivariateComparison<M::Fit>>
where
    M: ModelFamily,
    T: CovariateSource,
    Y: Fn(&T) -> f64 + Copy,
{
    let null = family.fit(&ModelFrame::build(rows, &[], response)?)?;
    let fit = family.fit(&ModelFrame::build(rows, &[covariate], response)?)?;
    let lrt = likelihood_ratio_test(&fit, &null)?;
    Ok(UnivariateComparison {
        covariate,
        fit,
        lrt,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::frame::tests::Row;
    use crate::model::glmm::tests::simulated_rows;
    use crate::model::{MixedLogistic, OrdinaryLeastSquares, PenalizedLogistic};

    #[test]
    fn test_omission_reduces_params_and_lrt_non_negative() {
        let rows = simulated_rows(21, 24, 10);
        let analysis = omission_analysis(
            &PenalizedLogistic::maximum_likelihood(),
            &rows,
            &[Covariate::Smoothness, Covariate::Package],
            |r: &Row| r.response,
        )
        .unwrap();

        assert_eq!(analysis.comparisons.len(), 2);
        for cmp in &analysis.comparisons {
            assert!(cmp.reduced_params < cmp.full_params);
            assert!(cmp.lrt.statistic >= 0.0);
            assert!((0.0..=1.0).contains(&cmp.lrt.p_value));
        }
        // Package has four levels -> three columns
        let package = analysis
            .comparisons
            .iter()
            .find(|c| c.covariate == Covariate::Package)
            .unwrap();
        assert_eq!(package.lrt.df, 3);
    }

    #[test]
    fn test_mixed_model_omission() {
        let rows = simulated_rows(5, 24, 10);
        let analysis = omission_analysis(
            &MixedLogistic::default(),
            &rows,
            &[Covariate::Smoothness, Covariate::Package],
            |r: &Row| r.response,
        )
        .unwrap();

        let smoothness = &analysis.comparisons[0];
        assert_eq!(smoothness.covariate, Covariate::Smoothness);
        assert_eq!(smoothness.lrt.df, 1);
        // Smoothness drives the simulated decisions
        assert!(smoothness.lrt.p_value < 0.05);
        assert!(smoothness.delta_marginal() > 0.0);
    }

    #[test]
    fn test_single_level_factor_skipped() {
        let mut rows = simulated_rows(9, 10, 6);
        for row in &mut rows {
            row.package = Some("SPM".into());
        }
        let analysis = omission_analysis(
            &PenalizedLogistic::maximum_likelihood(),
            &rows,
            &[Covariate::Smoothness, Covariate::Package],
            |r: &Row| r.response,
        )
        .unwrap();
        assert_eq!(analysis.skipped, vec![Covariate::Package]);
        assert_eq!(analysis.comparisons.len(), 1);
    }

    #[test]
    fn test_ols_adjusted_delta() {
        let rows: Vec<Row> = (0..12)
            .map(|i| Row {
                team: format!("t{}", i),
                smoothness: Some(i as f64),
                package: Some(if i % 2 == 0 { "FSL" } else { "SPM" }.to_string()),
                response: 0.5 * i as f64 + if i % 3 == 0 { 0.3 } else { -0.1 },
            })
            .collect();
        let analysis = omission_analysis(
            &OrdinaryLeastSquares,
            &rows,
            &[Covariate::Smoothness, Covariate::Package],
            |r: &Row| r.response,
        )
        .unwrap();
        let smoothness = &analysis.comparisons[0];
        assert!(smoothness.delta_adjusted().unwrap() > 0.5);
        assert!(smoothness.lrt.p_value < 1e-3);
    }

    #[test]
    fn test_lrt_rejects_non_nested_order() {
        let rows = simulated_rows(2, 10, 6);
        let family = PenalizedLogistic::maximum_likelihood();
        let small = family
            .fit(&ModelFrame::build(&rows, &[], |r: &Row| r.response).unwrap())
            .unwrap();
        let large = family
            .fit(&ModelFrame::build(&rows, &[Covariate::Smoothness], |r: &Row| r.response).unwrap())
            .unwrap();
        assert!(likelihood_ratio_test(&small, &large).is_err());
        assert!(likelihood_ratio_test(&large, &small).is_ok());
    }

    #[test]
    fn test_compare_to_null() {
        let rows = simulated_rows(17, 20, 10);
        let cmp = compare_to_null(
            &MixedLogistic::default(),
            &rows,
            Covariate::Smoothness,
            |r: &Row| r.response,
        )
        .unwrap();
        assert_eq!(cmp.lrt.df, 1);
        assert!(cmp.lrt.statistic > 0.0);
    }
}
