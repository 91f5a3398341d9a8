// Logistic regression by iteratively reweighted least squares
//
// With a prior scale the slopes get an independent N(0, scale²) prior and the
// fit returns the posterior mode; this keeps the small per-hypothesis
// subgroups estimable under complete separation. The intercept is never
// penalised. The prior acts on the coefficients as they are, so predictors
// are not rescaled and the shrinkage of a numeric slope depends on its units.
// Reported log-likelihoods are the unpenalised Bernoulli
// log-likelihood at the estimate.

use super::{
    check_pivots, wald_coefficients, Coefficient, FitError, FittedModel, ModelFamily,
    ModelFrame, RSquared, Result,
};
use nalgebra::{Cholesky, DMatrix, DVector};

const MAX_ITERATIONS: usize = 100;
const MAX_HALVINGS: usize = 30;
const STEP_TOLERANCE: f64 = 1e-10;

/// Logistic regression family, optionally regularised
#[derive(Debug, Clone, Copy)]
pub struct PenalizedLogistic {
    /// Standard deviation of the Gaussian prior on each slope; `None` fits
    /// the plain maximum-likelihood model
    pub prior_scale: Option<f64>,
}

impl PenalizedLogistic {
    pub fn maximum_likelihood() -> Self {
        Self { prior_scale: None }
    }

    pub fn with_prior(scale: f64) -> Self {
        Self {
            prior_scale: Some(scale),
        }
    }
}

/// Fitted logistic regression
#[derive(Debug, Clone)]
pub struct LogisticFit {
    coefficients: Vec<Coefficient>,
    covariance: DMatrix<f64>,
    pub beta: DVector<f64>,
    pub iterations: usize,
    log_likelihood: f64,
    null_log_likelihood: f64,
    p: usize,
}

impl LogisticFit {
    /// McFadden pseudo-R², `1 - ll / ll_null`
    pub fn mcfadden_r2(&self) -> f64 {
        if self.null_log_likelihood < 0.0 {
            1.0 - self.log_likelihood / self.null_log_likelihood
        } else {
            0.0
        }
    }
}

impl FittedModel for LogisticFit {
    fn coefficients(&self) -> &[Coefficient] {
        &self.coefficients
    }

    fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    fn n_params(&self) -> usize {
        self.p
    }

    fn r_squared(&self) -> RSquared {
        let r2 = self.mcfadden_r2();
        RSquared {
            marginal: r2,
            conditional: r2,
            adjusted: None,
        }
    }

    fn residual_df(&self) -> Option<f64> {
        None
    }
}

impl ModelFamily for PenalizedLogistic {
    type Fit = LogisticFit;

    fn name(&self) -> &'static str {
        if self.prior_scale.is_some() {
            "bayes-logistic"
        } else {
            "logistic"
        }
    }

    fn fit(&self, frame: &ModelFrame) -> Result<LogisticFit> {
        check_binary(&frame.y)?;
        let x = &frame.x;
        let y = &frame.y;
        let n = x.nrows();
        let p = x.ncols();
        if n < p {
            return Err(FitError::InsufficientData {
                required: p,
                actual: n,
            });
        }

        let penalty = self.penalty(p)?;
        let objective = |beta: &DVector<f64>| {
            bernoulli_log_likelihood(y, &(x * beta)) - 0.5 * (beta.transpose() * &penalty * beta)[0]
        };

        let mut beta = DVector::zeros(p);
        let mut current = objective(&beta);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < MAX_ITERATIONS {
            iterations += 1;
            let eta = x * &beta;
            let mu = eta.map(logistic);
            let w = mu.map(|m| (m * (1.0 - m)).max(1e-12));

            let gradient = x.transpose() * (y - &mu) - &penalty * &beta;
            let hessian = weighted_cross_product(x, &w) + &penalty;
            let chol = Cholesky::new(hessian).ok_or_else(|| {
                FitError::SingularDesign("logistic information matrix is not positive definite".into())
            })?;
            let mut step = chol.solve(&gradient);

            let mut accepted = false;
            for _ in 0..MAX_HALVINGS {
                let candidate = &beta + &step;
                let value = objective(&candidate);
                if value.is_finite() && value >= current - 1e-12 {
                    beta = candidate;
                    current = value;
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }

            let step_size = step.amax();
            if !accepted {
                if step_size < STEP_TOLERANCE {
                    converged = true;
                    break;
                }
                return Err(FitError::NonConvergence(
                    "logistic IRLS step halving failed to improve the objective".into(),
                ));
            }
            if step_size < STEP_TOLERANCE {
                converged = true;
                break;
            }
            if beta.amax() > 1e6 {
                return Err(FitError::NonConvergence(
                    "logistic coefficients diverged (complete separation?)".into(),
                ));
            }
        }

        if !converged {
            return Err(FitError::NonConvergence(format!(
                "logistic IRLS did not converge in {} iterations",
                MAX_ITERATIONS
            )));
        }

        let eta = x * &beta;
        let mu = eta.map(logistic);
        let w = mu.map(|m| (m * (1.0 - m)).max(1e-12));
        let information = weighted_cross_product(x, &w) + &penalty;
        let chol = Cholesky::new(information).ok_or_else(|| {
            FitError::SingularDesign("logistic information matrix is not positive definite".into())
        })?;
        check_pivots(&chol.l(), "logistic information matrix")?;
        let covariance = chol.inverse();
        let coefficients = wald_coefficients(&frame.column_names, &beta, &covariance, None);

        tracing::debug!(iterations, family = self.name(), "logistic fit converged");

        Ok(LogisticFit {
            coefficients,
            covariance,
            log_likelihood: bernoulli_log_likelihood(y, &eta),
            null_log_likelihood: null_log_likelihood(y),
            beta,
            iterations,
            p,
        })
    }
}

impl PenalizedLogistic {
    fn penalty(&self, p: usize) -> Result<DMatrix<f64>> {
        let mut penalty = DMatrix::zeros(p, p);
        if let Some(scale) = self.prior_scale {
            if scale <= 0.0 || !scale.is_finite() {
                return Err(FitError::InvalidInput(format!(
                    "prior scale must be positive, got {}",
                    scale
                )));
            }
            for j in 1..p {
                penalty[(j, j)] = 1.0 / (scale * scale);
            }
        }
        Ok(penalty)
    }
}

/// Inverse logit
pub(crate) fn logistic(eta: f64) -> f64 {
    if eta >= 0.0 {
        1.0 / (1.0 + (-eta).exp())
    } else {
        let e = eta.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^x)` without overflow
pub(crate) fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

/// Bernoulli log-likelihood on the logit scale
pub(crate) fn bernoulli_log_likelihood(y: &DVector<f64>, eta: &DVector<f64>) -> f64 {
    y.iter()
        .zip(eta.iter())
        .map(|(&yi, &ei)| yi * ei - softplus(ei))
        .sum()
}

/// `X' diag(w) X`
pub(crate) fn weighted_cross_product(x: &DMatrix<f64>, w: &DVector<f64>) -> DMatrix<f64> {
    let mut weighted = x.clone();
    for (i, mut row) in weighted.row_iter_mut().enumerate() {
        row *= w[i];
    }
    x.transpose() * weighted
}

pub(crate) fn check_binary(y: &DVector<f64>) -> Result<()> {
    if y.iter().any(|&v| v != 0.0 && v != 1.0) {
        return Err(FitError::InvalidInput(
            "binomial response must be coded 0/1".into(),
        ));
    }
    Ok(())
}

fn null_log_likelihood(y: &DVector<f64>) -> f64 {
    let n = y.len() as f64;
    let k = y.sum();
    let term = |count: f64| {
        if count > 0.0 {
            count * (count / n).ln()
        } else {
            0.0
        }
    };
    term(k) + term(n - k)
}
