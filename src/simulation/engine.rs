// Monte Carlo sweep over the true loss-aversion parameter
//
// For every lambda on the grid a dedicated RNG is seeded with
// `seed + lambda_index`, so a sweep is reproducible and each lambda's
// replicates do not depend on how many lambdas precede it. Within a replicate
// one noise vector is drawn and applied to both designs.

use super::design::{DesignKind, GambleDesign, TRIALS};
use super::{Result, SimulationError};
use crate::config::SimulationConfig;
use crate::model::OlsFit;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;
use std::fmt;

/// Scale on which coefficients are estimated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoefficientMode {
    /// Response and predictors on their natural scale
    Raw,
    /// Response and predictors z-scored (sample SD) before fitting
    Standardized,
}

impl CoefficientMode {
    pub const ALL: [CoefficientMode; 2] = [CoefficientMode::Raw, CoefficientMode::Standardized];

    pub fn name(&self) -> &'static str {
        match self {
            CoefficientMode::Raw => "raw",
            CoefficientMode::Standardized => "standardized",
        }
    }
}

impl fmt::Display for CoefficientMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Coefficients of one replicate fit
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LossAversionFit {
    pub intercept: f64,
    pub gain: f64,
    pub loss: f64,
    /// `-loss / gain`
    pub lambda_hat: f64,
}

/// One (lambda, replicate, design) estimate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReplicateEstimate {
    pub lambda: f64,
    pub replicate: usize,
    pub design: DesignKind,
    pub fit: LossAversionFit,
}

/// All estimates of one sweep
#[derive(Debug, Clone)]
pub struct Sweep {
    pub mode: CoefficientMode,
    pub lambdas: Vec<f64>,
    pub estimates: Vec<ReplicateEstimate>,
}

impl Sweep {
    pub fn for_design(&self, design: DesignKind) -> impl Iterator<Item = &ReplicateEstimate> {
        self.estimates.iter().filter(move |e| e.design == design)
    }

    pub fn at(
        &self,
        lambda: f64,
        design: DesignKind,
    ) -> impl Iterator<Item = &ReplicateEstimate> {
        self.estimates
            .iter()
            .filter(move |e| e.design == design && e.lambda == lambda)
    }
}

/// Regress `response ~ 1 + gain + loss` on a design
pub fn fit_design(
    design: &GambleDesign,
    response: &[f64],
    mode: CoefficientMode,
) -> Result<LossAversionFit> {
    let n = design.n_trials();
    if response.len() != n {
        return Err(SimulationError::Dimension {
            expected: n,
            actual: response.len(),
        });
    }

    let (gains, losses, y) = match mode {
        CoefficientMode::Raw => (
            design.gains.clone(),
            design.losses.clone(),
            response.to_vec(),
        ),
        CoefficientMode::Standardized => (
            standardize(&design.gains)?,
            standardize(&design.losses)?,
            standardize(response)?,
        ),
    };

    let x = DMatrix::from_fn(n, 3, |i, j| match j {
        0 => 1.0,
        1 => gains[i],
        _ => losses[i],
    });
    let names = ["(Intercept)", "gain", "loss"].map(String::from);
    let fit = OlsFit::from_matrices(&x, &DVector::from_vec(y), &names)?;

    let (intercept, gain, loss) = (fit.beta[0], fit.beta[1], fit.beta[2]);
    Ok(LossAversionFit {
        intercept,
        gain,
        loss,
        lambda_hat: -loss / gain,
    })
}

/// Run every (lambda, replicate) for both designs in one coefficient mode
pub fn run_sweep(config: &SimulationConfig, mode: CoefficientMode) -> Result<Sweep> {
    if !(config.noise_sd >= 0.0 && config.noise_sd.is_finite()) {
        return Err(SimulationError::InvalidNoise(config.noise_sd));
    }
    let noise = Normal::new(0.0, config.noise_sd)
        .map_err(|_| SimulationError::InvalidNoise(config.noise_sd))?;
    let designs: Vec<GambleDesign> = DesignKind::ALL.iter().map(|&k| GambleDesign::new(k)).collect();
    let lambdas = config.lambda_grid();

    let mut estimates = Vec::with_capacity(lambdas.len() * config.replicates * designs.len());
    for (index, &lambda) in lambdas.iter().enumerate() {
        let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(index as u64));
        for replicate in 0..config.replicates {
            let draw: Vec<f64> = (0..TRIALS).map(|_| noise.sample(&mut rng)).collect();
            for design in &designs {
                let response = design.response(lambda, &draw);
                let fit = fit_design(design, &response, mode)?;
                estimates.push(ReplicateEstimate {
                    lambda,
                    replicate,
                    design: design.kind,
                    fit,
                });
            }
        }
        tracing::trace!(lambda, mode = %mode, "lambda finished");
    }

    tracing::debug!(
        mode = %mode,
        lambdas = lambdas.len(),
        replicates = config.replicates,
        "simulation sweep complete"
    );
    Ok(Sweep {
        mode,
        lambdas,
        estimates,
    })
}

/// z-score with the sample (n - 1) standard deviation
fn standardize(values: &[f64]) -> Result<Vec<f64>> {
    let mean = crate::stats::mean(values);
    let sd = crate::stats::sample_variance(values).sqrt();
    if !(sd > 0.0) {
        return Err(SimulationError::ConstantColumn);
    }
    Ok(values.iter().map(|v| (v - mean) / sd).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config(noise_sd: f64) -> SimulationConfig {
        SimulationConfig {
            lambda_start: 1.0,
            lambda_stop: 2.0,
            lambda_step: 0.5,
            replicates: 4,
            noise_sd,
            seed: 7,
        }
    }

    #[test]
    fn test_noiseless_recovery_indifference() {
        let design = GambleDesign::new(DesignKind::Indifference);
        let response = design.response(2.0, &[]);
        let fit = fit_design(&design, &response, CoefficientMode::Raw).unwrap();
        assert!((fit.lambda_hat - 2.0).abs() < 1e-8);
        assert!((fit.gain - 1.0).abs() < 1e-8);
        assert!((fit.loss + 2.0).abs() < 1e-8);
        assert!(fit.intercept.abs() < 1e-6);
    }

    #[test]
    fn test_noiseless_recovery_standardized() {
        for kind in DesignKind::ALL {
            let design = GambleDesign::new(kind);
            let response = design.response(3.5, &[]);
            let fit = fit_design(&design, &response, CoefficientMode::Standardized).unwrap();
            assert!((fit.lambda_hat - 3.5 * design_sd_ratio(&design)).abs() < 1e-8);
            assert!(fit.intercept.abs() < 1e-10);
        }
    }

    // Standardized lambda_hat = lambda * sd(loss) / sd(gain)
    fn design_sd_ratio(design: &GambleDesign) -> f64 {
        let sd = |v: &[f64]| crate::stats::sample_variance(v).sqrt();
        sd(&design.losses) / sd(&design.gains)
    }

    #[test]
    fn test_dimension_mismatch() {
        let design = GambleDesign::new(DesignKind::Equal);
        let err = fit_design(&design, &[1.0, 2.0], CoefficientMode::Raw).unwrap_err();
        assert!(matches!(err, SimulationError::Dimension { .. }));
    }

    #[test]
    fn test_sweep_shape() {
        let sweep = run_sweep(&quick_config(1.0), CoefficientMode::Raw).unwrap();
        assert_eq!(sweep.lambdas, vec![1.0, 1.5, 2.0]);
        assert_eq!(sweep.estimates.len(), 3 * 4 * 2);
        assert_eq!(sweep.at(1.5, DesignKind::Equal).count(), 4);
        assert_eq!(sweep.for_design(DesignKind::Indifference).count(), 12);
    }

    #[test]
    fn test_invalid_noise_rejected_before_sampling() {
        for sd in [-1.0, -1e-9, f64::NAN, f64::INFINITY] {
            let err = run_sweep(&quick_config(sd), CoefficientMode::Raw).unwrap_err();
            assert!(matches!(err, SimulationError::InvalidNoise(_)), "sd = {}", sd);
        }
    }

    #[test]
    fn test_sweep_is_deterministic() {
        let a = run_sweep(&quick_config(1.0), CoefficientMode::Raw).unwrap();
        let b = run_sweep(&quick_config(1.0), CoefficientMode::Raw).unwrap();
        assert_eq!(a.estimates, b.estimates);
    }

    #[test]
    fn test_seed_changes_draws() {
        let a = run_sweep(&quick_config(1.0), CoefficientMode::Raw).unwrap();
        let mut config = quick_config(1.0);
        config.seed = 8;
        let b = run_sweep(&config, CoefficientMode::Raw).unwrap();
        assert_ne!(a.estimates, b.estimates);
    }

    #[test]
    fn test_noiseless_sweep_recovers_every_lambda() {
        let sweep = run_sweep(&quick_config(0.0), CoefficientMode::Raw).unwrap();
        for e in &sweep.estimates {
            assert!((e.fit.lambda_hat - e.lambda).abs() < 1e-8);
        }
    }

    #[test]
    fn test_shared_noise_between_designs() {
        let config = quick_config(2.0);
        let sweep = run_sweep(&config, CoefficientMode::Raw).unwrap();

        let mut rng = StdRng::seed_from_u64(config.seed);
        let noise = Normal::new(0.0, config.noise_sd).unwrap();
        let draw: Vec<f64> = (0..TRIALS).map(|_| noise.sample(&mut rng)).collect();
        for kind in DesignKind::ALL {
            let design = GambleDesign::new(kind);
            let expected = fit_design(&design, &design.response(1.0, &draw), CoefficientMode::Raw)
                .unwrap();
            let first = sweep.at(1.0, kind).next().unwrap();
            assert_eq!(first.replicate, 0);
            assert_eq!(first.fit, expected);
        }
    }
}
