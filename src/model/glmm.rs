// Binomial GLMM with a random intercept per team (Laplace approximation)
//
// Parameterisation follows the spherical random-effects form:
//   eta_i = x_i' beta + theta * u_g(i),   u ~ N(0, I)
// so theta is the team standard deviation.
//
// For a given theta, penalised IRLS (PIRLS) finds the joint conditional mode
// of (beta, u). The Laplace deviance at that mode
//   D(theta) = -2 log p(y | eta) + |u|² + sum_j log(theta² W_j + 1)
// (W_j = total IRLS weight of team j) is then minimised over theta >= 0.
//
// The primary optimizer is Newton on D(theta); when it fails the fit switches
// to Nelder-Mead before giving up. Both failures together are reported as
// FitError::NonConvergence.

use super::logistic::{bernoulli_log_likelihood, check_binary, logistic, weighted_cross_product};
use super::optim::{nelder_mead, newton, OptimizerKind, Optimum};
use super::{
    check_pivots, wald_coefficients, Coefficient, FitError, FittedModel, ModelFamily,
    ModelFrame, RSquared, Result,
};
use crate::config::GlmmConfig;
use nalgebra::{Cholesky, DMatrix, DVector};
use std::f64::consts::PI;

const MAX_HALVINGS: usize = 30;
const STEP_TOLERANCE: f64 = 1e-10;

/// Latent residual variance of the logit link
const LOGIT_RESIDUAL_VARIANCE: f64 = PI * PI / 3.0;

/// Random-intercept logistic mixed model
#[derive(Debug, Clone, Default)]
pub struct MixedLogistic {
    pub config: GlmmConfig,
}

impl MixedLogistic {
    pub fn new(config: GlmmConfig) -> Self {
        Self { config }
    }
}

/// Fitted random-intercept logistic model
#[derive(Debug, Clone)]
pub struct GlmmFit {
    coefficients: Vec<Coefficient>,
    covariance: DMatrix<f64>,
    pub beta: DVector<f64>,
    /// Standard deviation of the team intercepts
    pub theta: f64,
    /// Predicted team intercepts (theta * u), ordered as `group_names`
    pub random_effects: Vec<f64>,
    pub group_names: Vec<String>,
    /// Laplace deviance at the optimum
    pub deviance: f64,
    /// Optimizer that produced `theta`
    pub optimizer: OptimizerKind,
    /// True when the primary optimizer failed and the fallback was used
    pub used_fallback: bool,
    pub evaluations: usize,
    r_squared: RSquared,
    p: usize,
}

impl FittedModel for GlmmFit {
    fn coefficients(&self) -> &[Coefficient] {
        &self.coefficients
    }

    fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    fn log_likelihood(&self) -> f64 {
        -0.5 * self.deviance
    }

    fn n_params(&self) -> usize {
        // fixed effects plus the team variance
        self.p + 1
    }

    fn r_squared(&self) -> RSquared {
        self.r_squared
    }

    fn residual_df(&self) -> Option<f64> {
        None
    }
}

impl ModelFamily for MixedLogistic {
    type Fit = GlmmFit;

    fn name(&self) -> &'static str {
        "glmm-logistic"
    }

    fn fit(&self, frame: &ModelFrame) -> Result<GlmmFit> {
        check_binary(&frame.y)?;
        let p = frame.n_columns();
        if frame.n_rows() <= p {
            return Err(FitError::InsufficientData {
                required: p,
                actual: frame.n_rows(),
            });
        }
        if frame.n_groups() < 2 {
            return Err(FitError::InvalidInput(
                "random intercept needs at least two teams".into(),
            ));
        }

        let mut profile = LaplaceProfile::new(frame, self.config.pirls_max_iterations);
        let start = self.config.initial_theta;

        let (optimum, used_fallback) = match self.config.primary_optimizer {
            OptimizerKind::Newton => {
                match newton(|t| profile.deviance(t), start, 0.0, &self.config.newton) {
                    Ok(opt) => (opt, false),
                    Err(err) => {
                        tracing::warn!(
                            error = %err,
                            "newton failed on the Laplace deviance, switching to nelder-mead"
                        );
                        (self.simplex(&mut profile, start)?, true)
                    }
                }
            }
            OptimizerKind::NelderMead => (self.simplex(&mut profile, start)?, false),
        };

        let theta = optimum.x[0].abs();
        let mode = profile.mode(theta)?;
        let evaluations = profile.evaluations;

        tracing::debug!(
            theta,
            deviance = mode.deviance,
            optimizer = %optimum.optimizer,
            evaluations,
            "mixed model converged"
        );

        let q = frame.n_groups();
        let chol = Cholesky::new(mode.information.clone()).ok_or_else(|| {
            FitError::SingularDesign("joint information matrix is not positive definite".into())
        })?;
        check_pivots(&chol.l(), "joint information matrix")?;
        let covariance = chol.inverse().view((0, 0), (p, p)).into_owned();
        let coefficients = wald_coefficients(&frame.column_names, &mode.beta, &covariance, None);

        let fixed = &frame.x * &mode.beta;
        let fixed_variance = crate::stats::sample_variance(fixed.as_slice()).max(0.0);
        let team_variance = theta * theta;
        let total = fixed_variance + team_variance + LOGIT_RESIDUAL_VARIANCE;
        let r_squared = RSquared {
            marginal: fixed_variance / total,
            conditional: (fixed_variance + team_variance) / total,
            adjusted: None,
        };

        Ok(GlmmFit {
            coefficients,
            covariance,
            random_effects: (0..q).map(|j| theta * mode.u[j]).collect(),
            group_names: frame.group_names.clone(),
            beta: mode.beta,
            theta,
            deviance: mode.deviance,
            optimizer: optimum.optimizer,
            used_fallback,
            evaluations,
            r_squared,
            p,
        })
    }
}

impl MixedLogistic {
    fn simplex(&self, profile: &mut LaplaceProfile<'_>, start: f64) -> Result<Optimum> {
        nelder_mead(
            |t| profile.deviance(t[0].abs()),
            &[start],
            0.5,
            &self.config.nelder_mead,
        )
    }
}

/// Conditional modes and Laplace deviance for one theta
#[derive(Debug, Clone)]
struct ConditionalMode {
    beta: DVector<f64>,
    u: DVector<f64>,
    /// Joint negative Hessian of the penalised log-likelihood at the mode
    information: DMatrix<f64>,
    deviance: f64,
}

/// Laplace deviance as a function of theta, warm-started between calls
struct LaplaceProfile<'a> {
    frame: &'a ModelFrame,
    max_iterations: usize,
    warm: Option<(DVector<f64>, DVector<f64>)>,
    evaluations: usize,
}

impl<'a> LaplaceProfile<'a> {
    fn new(frame: &'a ModelFrame, max_iterations: usize) -> Self {
        Self {
            frame,
            max_iterations,
            warm: None,
            evaluations: 0,
        }
    }

    fn deviance(&mut self, theta: f64) -> Result<f64> {
        Ok(self.mode(theta)?.deviance)
    }

    fn mode(&mut self, theta: f64) -> Result<ConditionalMode> {
        if !theta.is_finite() || theta < 0.0 {
            return Err(FitError::InvalidInput(format!(
                "team standard deviation must be finite and non-negative, got {}",
                theta
            )));
        }
        self.evaluations += 1;
        let mode = pirls(self.frame, theta, self.warm.as_ref(), self.max_iterations)?;
        self.warm = Some((mode.beta.clone(), mode.u.clone()));
        Ok(mode)
    }
}

fn linear_predictor(
    frame: &ModelFrame,
    theta: f64,
    beta: &DVector<f64>,
    u: &DVector<f64>,
) -> DVector<f64> {
    let mut eta = &frame.x * beta;
    for (i, &g) in frame.groups.iter().enumerate() {
        eta[i] += theta * u[g];
    }
    eta
}

fn penalised_log_likelihood(frame: &ModelFrame, eta: &DVector<f64>, u: &DVector<f64>) -> f64 {
    bernoulli_log_likelihood(&frame.y, eta) - 0.5 * u.norm_squared()
}

fn joint_information(frame: &ModelFrame, theta: f64, w: &DVector<f64>) -> DMatrix<f64> {
    let p = frame.n_columns();
    let q = frame.n_groups();
    let mut info = DMatrix::zeros(p + q, p + q);
    info.view_mut((0, 0), (p, p))
        .copy_from(&weighted_cross_product(&frame.x, w));

    for (i, &g) in frame.groups.iter().enumerate() {
        for k in 0..p {
            info[(k, p + g)] += theta * w[i] * frame.x[(i, k)];
        }
        info[(p + g, p + g)] += theta * theta * w[i];
    }
    for j in 0..q {
        info[(p + j, p + j)] += 1.0;
        for k in 0..p {
            info[(p + j, k)] = info[(k, p + j)];
        }
    }
    info
}

fn pirls(
    frame: &ModelFrame,
    theta: f64,
    start: Option<&(DVector<f64>, DVector<f64>)>,
    max_iterations: usize,
) -> Result<ConditionalMode> {
    let p = frame.n_columns();
    let q = frame.n_groups();
    let (mut beta, mut u) = match start {
        Some((b, u)) if b.len() == p && u.len() == q => (b.clone(), u.clone()),
        _ => (DVector::zeros(p), DVector::zeros(q)),
    };

    let mut eta = linear_predictor(frame, theta, &beta, &u);
    let mut current = penalised_log_likelihood(frame, &eta, &u);
    let mut converged = false;

    for _ in 0..max_iterations {
        let mu = eta.map(logistic);
        let w = mu.map(|m| (m * (1.0 - m)).max(1e-12));
        let residual = &frame.y - &mu;

        let mut gradient = DVector::zeros(p + q);
        gradient
            .rows_mut(0, p)
            .copy_from(&(frame.x.transpose() * &residual));
        for (i, &g) in frame.groups.iter().enumerate() {
            gradient[p + g] += theta * residual[i];
        }
        for j in 0..q {
            gradient[p + j] -= u[j];
        }

        let chol = Cholesky::new(joint_information(frame, theta, &w)).ok_or_else(|| {
            FitError::SingularDesign("PIRLS information matrix is not positive definite".into())
        })?;
        let mut step = chol.solve(&gradient);

        let mut accepted = false;
        for _ in 0..MAX_HALVINGS {
            let candidate_beta = &beta + &step.rows(0, p).into_owned();
            let candidate_u = &u + &step.rows(p, q).into_owned();
            let candidate_eta = linear_predictor(frame, theta, &candidate_beta, &candidate_u);
            let value = penalised_log_likelihood(frame, &candidate_eta, &candidate_u);
            if value.is_finite() && value >= current - 1e-12 {
                beta = candidate_beta;
                u = candidate_u;
                eta = candidate_eta;
                current = value;
                accepted = true;
                break;
            }
            step *= 0.5;
        }

        let step_size = step.amax();
        if !accepted && step_size >= STEP_TOLERANCE {
            return Err(FitError::NonConvergence(format!(
                "PIRLS step halving failed at theta = {}",
                theta
            )));
        }
        if step_size < STEP_TOLERANCE {
            converged = true;
            break;
        }
        if beta.amax() > 1e6 {
            return Err(FitError::NonConvergence(
                "PIRLS fixed effects diverged (complete separation?)".into(),
            ));
        }
    }

    if !converged {
        return Err(FitError::NonConvergence(format!(
            "PIRLS did not converge in {} iterations at theta = {}",
            max_iterations, theta
        )));
    }

    let mu = eta.map(logistic);
    let w = mu.map(|m| (m * (1.0 - m)).max(1e-12));
    let mut team_weight = vec![0.0; q];
    for (i, &g) in frame.groups.iter().enumerate() {
        team_weight[g] += w[i];
    }
    let log_det: f64 = team_weight
        .iter()
        .map(|&wj| (theta * theta * wj + 1.0).ln())
        .sum();
    let deviance = -2.0 * bernoulli_log_likelihood(&frame.y, &eta) + u.norm_squared() + log_det;

    Ok(ConditionalMode {
        information: joint_information(frame, theta, &w),
        beta,
        u,
        deviance,
    })
}
