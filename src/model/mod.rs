// Regression models for the NARPS decision and pattern-distance analyses
//
// Every model family fits a `ModelFrame` (fixed-effect design matrix, response
// and team grouping) and exposes the quantities needed for nested model
// comparison: log-likelihood, parameter count, (pseudo-)R² and the Wald
// covariance of the fixed effects.
//
// Families:
// - OrdinaryLeastSquares: Gaussian linear model (pattern distances, simulation)
// - PenalizedLogistic: logistic regression with an optional Gaussian prior
//   on the slopes (per-hypothesis subgroups)
// - MixedLogistic: binomial GLMM with a random intercept per team, fitted by
//   the Laplace approximation (team decisions)

mod compare;
mod frame;
mod glmm;
mod logistic;
mod ols;
pub mod optim;
mod posthoc;

pub use compare::{
    compare_to_null, likelihood_ratio_test, omission_analysis, LikelihoodRatioTest,
    OmissionAnalysis, OmissionComparison, UnivariateComparison,
};
pub use frame::{Covariate, CovariateKind, CovariateSource, CovariateValue, ModelFrame, Term};
pub use glmm::{GlmmFit, MixedLogistic};
pub use logistic::{LogisticFit, PenalizedLogistic};
pub use ols::{OlsFit, OrdinaryLeastSquares};
pub use posthoc::{
    compact_letter_display, estimated_marginal_means, LevelMean, PairwiseContrast, PostHoc,
};

use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while building or fitting a model
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Model frame has no rows")]
    EmptyFrame,

    #[error("Insufficient data: need more than {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Design matrix is singular: {0}")]
    SingularDesign(String),

    #[error("Optimizer failed to converge: {0}")]
    NonConvergence(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, FitError>;

/// One fixed-effect estimate with its Wald test
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coefficient {
    pub name: String,
    pub estimate: f64,
    pub std_error: f64,
    /// z (asymptotic) or t statistic
    pub statistic: f64,
    pub p_value: f64,
}

impl Coefficient {
    /// Wald confidence interval on the linear-predictor scale
    pub fn confidence_interval(&self, level: f64) -> (f64, f64) {
        let z = crate::stats::normal_quantile(0.5 + level / 2.0);
        (
            self.estimate - z * self.std_error,
            self.estimate + z * self.std_error,
        )
    }
}

/// Variance explained by a fitted model
///
/// For mixed models `marginal` covers the fixed effects only and
/// `conditional` adds the random intercept (Nakagawa & Schielzeth). Models
/// without random effects report the same value in both.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RSquared {
    pub marginal: f64,
    pub conditional: f64,
    /// Adjusted R², only defined for least-squares fits
    pub adjusted: Option<f64>,
}

/// Quantities every fitted model exposes for nested comparison
pub trait FittedModel {
    fn coefficients(&self) -> &[Coefficient];

    /// Covariance of the fixed-effect estimates
    fn covariance(&self) -> &DMatrix<f64>;

    fn log_likelihood(&self) -> f64;

    /// Number of estimated parameters (fixed effects plus variance terms)
    fn n_params(&self) -> usize;

    fn r_squared(&self) -> RSquared;

    /// Residual degrees of freedom for t tests, `None` for asymptotic z tests
    fn residual_df(&self) -> Option<f64>;

    fn estimates(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.coefficients().len(),
            self.coefficients().iter().map(|c| c.estimate),
        )
    }
}

/// A model family that can be fitted to a frame
pub trait ModelFamily {
    type Fit: FittedModel;

    fn name(&self) -> &'static str;

    fn fit(&self, frame: &ModelFrame) -> Result<Self::Fit>;
}

/// Build Wald coefficient rows from estimates and their covariance
pub(crate) fn wald_coefficients(
    names: &[String],
    beta: &DVector<f64>,
    covariance: &DMatrix<f64>,
    df: Option<f64>,
) -> Vec<Coefficient> {
    names
        .iter()
        .enumerate()
        .map(|(j, name)| {
            let std_error = covariance[(j, j)].max(0.0).sqrt();
            let statistic = beta[j] / std_error;
            Coefficient {
                name: name.clone(),
                estimate: beta[j],
                std_error,
                statistic,
                p_value: crate::stats::two_sided_p_value(statistic, df),
            }
        })
        .collect()
}

/// Reject near-singular Cholesky factors of a cross-product matrix
pub(crate) fn check_pivots(l: &DMatrix<f64>, what: &str) -> Result<()> {
    let diag: Vec<f64> = (0..l.nrows()).map(|i| l[(i, i)].abs()).collect();
    let max = diag.iter().cloned().fold(0.0_f64, f64::max);
    if diag.iter().any(|&d| !d.is_finite() || d <= 1e-7 * max.max(1e-300)) {
        return Err(FitError::SingularDesign(format!(
            "{} is rank deficient",
            what
        )));
    }
    Ok(())
}
