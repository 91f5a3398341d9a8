// Ordinary least squares via the normal equations
//
// Used for the pattern-distance model and for every replicate of the design
// simulation, so the matrix entry point (`OlsFit::from_matrices`) does not
// need a frame.

use super::{
    check_pivots, wald_coefficients, Coefficient, FitError, FittedModel, ModelFamily,
    ModelFrame, RSquared, Result,
};
use nalgebra::{Cholesky, DMatrix, DVector};
use std::f64::consts::PI;

/// Gaussian linear model family
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdinaryLeastSquares;

/// Fitted least-squares model
#[derive(Debug, Clone)]
pub struct OlsFit {
    coefficients: Vec<Coefficient>,
    covariance: DMatrix<f64>,
    pub beta: DVector<f64>,
    pub residuals: DVector<f64>,
    pub rss: f64,
    pub tss: f64,
    pub n: usize,
    pub p: usize,
    log_likelihood: f64,
}

impl OlsFit {
    /// Fit `y ~ X` where `X` already carries any intercept column
    pub fn from_matrices(x: &DMatrix<f64>, y: &DVector<f64>, names: &[String]) -> Result<Self> {
        let n = x.nrows();
        let p = x.ncols();
        if n == 0 {
            return Err(FitError::EmptyFrame);
        }
        if n <= p {
            return Err(FitError::InsufficientData {
                required: p,
                actual: n,
            });
        }
        if y.len() != n || names.len() != p {
            return Err(FitError::InvalidInput(format!(
                "dimension mismatch: X is {}x{}, y has {}, {} names",
                n,
                p,
                y.len(),
                names.len()
            )));
        }

        let xtx = x.transpose() * x;
        let chol = Cholesky::new(xtx)
            .ok_or_else(|| FitError::SingularDesign("X'X is not positive definite".into()))?;
        check_pivots(&chol.l(), "X'X")?;

        let beta = chol.solve(&(x.transpose() * y));
        let residuals = y - x * &beta;
        let rss = residuals.norm_squared();
        let y_mean = y.mean();
        let tss = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>();

        let df = (n - p) as f64;
        let sigma2 = rss / df;
        let covariance = chol.inverse() * sigma2;
        let coefficients = wald_coefficients(names, &beta, &covariance, Some(df));

        // Maximum-likelihood Gaussian log-likelihood (sigma² = RSS / n)
        let nf = n as f64;
        let log_likelihood = -0.5 * nf * ((2.0 * PI).ln() + (rss / nf).ln() + 1.0);

        Ok(Self {
            coefficients,
            covariance,
            beta,
            residuals,
            rss,
            tss,
            n,
            p,
            log_likelihood,
        })
    }

    pub fn coefficient(&self, name: &str) -> Option<&Coefficient> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    pub fn r2(&self) -> f64 {
        if self.tss > 0.0 {
            1.0 - self.rss / self.tss
        } else {
            0.0
        }
    }

    pub fn adjusted_r2(&self) -> f64 {
        let n = self.n as f64;
        let p = self.p as f64;
        1.0 - (1.0 - self.r2()) * (n - 1.0) / (n - p)
    }
}

impl FittedModel for OlsFit {
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
        // fixed effects plus the residual variance
        self.p + 1
    }

    fn r_squared(&self) -> RSquared {
        let r2 = self.r2();
        RSquared {
            marginal: r2,
            conditional: r2,
            adjusted: Some(self.adjusted_r2()),
        }
    }

    fn residual_df(&self) -> Option<f64> {
        Some((self.n - self.p) as f64)
    }
}

impl ModelFamily for OrdinaryLeastSquares {
    type Fit = OlsFit;

    fn name(&self) -> &'static str {
        "ols"
    }

    fn fit(&self, frame: &ModelFrame) -> Result<OlsFit> {
        tracing::debug!(
            rows = frame.n_rows(),
            columns = frame.n_columns(),
            "fitting least-squares model"
        );
        OlsFit::from_matrices(&frame.x, &frame.y, &frame.column_names)
    }
}
