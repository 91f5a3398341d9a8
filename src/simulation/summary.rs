// Aggregation of simulation sweeps
//
// Per (lambda, design): descriptive summary of lambda_hat, mean coefficients,
// bias and RMSE. Across designs: the line relating equal-design loss
// coefficients to indifference-design loss coefficients, and a Welch t-test
// of lambda_hat between designs at each lambda.

use super::design::DesignKind;
use super::engine::{CoefficientMode, Sweep};
use super::Result;
use crate::model::OlsFit;
use crate::stats::{mean, DescriptiveSummary};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use std::fmt::Write as _;

/// Accuracy of lambda_hat for one design at one true lambda
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LambdaSummary {
    pub lambda: f64,
    pub design: DesignKind,
    pub lambda_hat: DescriptiveSummary,
    pub mean_gain: f64,
    pub mean_loss: f64,
    pub bias: f64,
    pub rmse: f64,
}

/// OLS line of equal-design on indifference-design loss coefficients
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IdentityLine {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

/// Welch t-test of lambda_hat between the two designs
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DesignTest {
    pub lambda: f64,
    pub statistic: f32,
    pub p_value: f32,
    pub df: f32,
}

/// Everything reported for one coefficient mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub mode: CoefficientMode,
    pub replicates: usize,
    pub summaries: Vec<LambdaSummary>,
    /// Absent when the indifference-design loss coefficients do not vary
    pub identity: Option<IdentityLine>,
    /// Lambdas where the test is undefined (zero variance) are absent
    pub design_tests: Vec<DesignTest>,
}

impl SimulationReport {
    pub fn from_sweep(sweep: &Sweep) -> Result<Self> {
        let mut summaries = Vec::with_capacity(sweep.lambdas.len() * DesignKind::ALL.len());
        let mut design_tests = Vec::with_capacity(sweep.lambdas.len());

        for &lambda in &sweep.lambdas {
            for design in DesignKind::ALL {
                let fits: Vec<_> = sweep.at(lambda, design).map(|e| e.fit).collect();
                let hats: Vec<f64> = fits.iter().map(|f| f.lambda_hat).collect();
                let Some(lambda_hat) = DescriptiveSummary::from_samples(&hats) else {
                    continue;
                };
                let gains: Vec<f64> = fits.iter().map(|f| f.gain).collect();
                let losses: Vec<f64> = fits.iter().map(|f| f.loss).collect();
                let bias = mean(&hats) - lambda;
                let rmse = (hats.iter().map(|h| (h - lambda).powi(2)).sum::<f64>()
                    / hats.len() as f64)
                    .sqrt();
                summaries.push(LambdaSummary {
                    lambda,
                    design,
                    lambda_hat,
                    mean_gain: mean(&gains),
                    mean_loss: mean(&losses),
                    bias,
                    rmse,
                });
            }

            let as_f32 = |design: DesignKind| -> Vec<f32> {
                sweep
                    .at(lambda, design)
                    .map(|e| e.fit.lambda_hat as f32)
                    .collect()
            };
            let indifference = as_f32(DesignKind::Indifference);
            let equal = as_f32(DesignKind::Equal);
            if let Some(test) = welch_test(&indifference, &equal) {
                design_tests.push(DesignTest {
                    lambda,
                    statistic: test.0,
                    p_value: test.1,
                    df: test.2,
                });
            }
        }

        let identity = identity_line(sweep);
        if let Some(line) = &identity {
            tracing::debug!(
                mode = %sweep.mode,
                slope = line.slope,
                "loss coefficients compared across designs"
            );
        }

        let replicates = sweep
            .lambdas
            .first()
            .map(|&l| sweep.at(l, DesignKind::Indifference).count())
            .unwrap_or(0);

        Ok(Self {
            mode: sweep.mode,
            replicates,
            summaries,
            identity,
            design_tests,
        })
    }

    pub fn summary(&self, lambda: f64, design: DesignKind) -> Option<&LambdaSummary> {
        self.summaries
            .iter()
            .find(|s| s.design == design && (s.lambda - lambda).abs() < 1e-12)
    }

    pub fn to_report_string(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(
            report,
            "=== Design Simulation ({} coefficients, {} replicates) ===",
            self.mode, self.replicates
        );
        let _ = writeln!(
            report,
            "{:>7} {:>13} {:>10} {:>10} {:>10} {:>10} {:>10}",
            "lambda", "design", "mean", "sd", "median", "bias", "rmse"
        );
        for s in &self.summaries {
            let _ = writeln!(
                report,
                "{:>7.2} {:>13} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4}",
                s.lambda,
                s.design,
                s.lambda_hat.mean,
                s.lambda_hat.stddev,
                s.lambda_hat.median,
                s.bias,
                s.rmse
            );
        }
        let _ = writeln!(report);
        match &self.identity {
            Some(line) => {
                let _ = writeln!(
                    report,
                    "Loss coefficients, equal ~ indifference: slope {:.4}, intercept {:.4}, R² {:.4}",
                    line.slope, line.intercept, line.r_squared
                );
            }
            None => {
                let _ = writeln!(
                    report,
                    "Loss coefficients, equal ~ indifference: undefined (no spread in indifference losses)"
                );
            }
        }
        if !self.design_tests.is_empty() {
            let _ = writeln!(report, "Welch t-test of lambda estimates between designs:");
            for t in &self.design_tests {
                let _ = writeln!(
                    report,
                    "  lambda {:.2}: t = {:.3}, df = {:.1}, p = {:.4}",
                    t.lambda, t.statistic, t.df, t.p_value
                );
            }
        }
        report
    }
}

/// OLS of equal-design on indifference-design loss coefficients, matched by
/// (lambda, replicate)
///
/// `None` with fewer than three pairs or when the indifference losses are
/// all equal (a single noiseless lambda).
pub fn identity_line(sweep: &Sweep) -> Option<IdentityLine> {
    let mut pairs = Vec::new();
    for e in sweep.for_design(DesignKind::Indifference) {
        if let Some(other) = sweep
            .at(e.lambda, DesignKind::Equal)
            .find(|o| o.replicate == e.replicate)
        {
            pairs.push((e.fit.loss, other.fit.loss));
        }
    }

    let n = pairs.len();
    if n < 3 {
        tracing::warn!(mode = %sweep.mode, pairs = n, "too few pairs for the identity line");
        return None;
    }
    let (lo, hi) = pairs
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.0), hi.max(p.0)));
    if hi - lo <= 1e-9 * (1.0 + hi.abs()) {
        tracing::warn!(mode = %sweep.mode, "indifference loss coefficients are constant, identity line skipped");
        return None;
    }

    let x = DMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { pairs[i].0 });
    let y = DVector::from_iterator(n, pairs.iter().map(|p| p.1));
    let names = ["(Intercept)", "indifference_loss"].map(String::from);
    match OlsFit::from_matrices(&x, &y, &names) {
        Ok(fit) => Some(IdentityLine {
            intercept: fit.beta[0],
            slope: fit.beta[1],
            r_squared: fit.r2(),
        }),
        Err(e) => {
            tracing::warn!(mode = %sweep.mode, error = %e, "identity line fit failed");
            None
        }
    }
}

/// Welch's t-test via aprender; `None` when undefined
fn welch_test(a: &[f32], b: &[f32]) -> Option<(f32, f32, f32)> {
    if a.len() < 2 || b.len() < 2 {
        return None;
    }
    let result = aprender::stats::hypothesis::ttest_ind(a, b, false).ok()?;
    result
        .statistic
        .is_finite()
        .then_some((result.statistic, result.pvalue, result.df))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::simulation::engine::run_sweep;

    fn config(noise_sd: f64, replicates: usize) -> SimulationConfig {
        SimulationConfig {
            lambda_start: 1.0,
            lambda_stop: 3.0,
            lambda_step: 0.5,
            replicates,
            noise_sd,
            seed: 11,
        }
    }

    #[test]
    fn test_noiseless_raw_summary() {
        let sweep = run_sweep(&config(0.0, 3), CoefficientMode::Raw).unwrap();
        let report = SimulationReport::from_sweep(&sweep).unwrap();
        assert_eq!(report.summaries.len(), 5 * 2);
        assert_eq!(report.replicates, 3);
        for s in &report.summaries {
            assert!(s.bias.abs() < 1e-6);
            assert!(s.rmse < 1e-6);
            assert!((s.mean_gain - 1.0).abs() < 1e-6);
            assert!((s.mean_loss + s.lambda).abs() < 1e-6);
        }
        let identity = report.identity.unwrap();
        assert!((identity.slope - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_standardized_coefficients_leave_identity_line() {
        let sweep = run_sweep(&config(0.0, 2), CoefficientMode::Standardized).unwrap();
        let line = identity_line(&sweep).unwrap();
        assert!((line.slope - 1.0).abs() > 0.1);
    }

    #[test]
    fn test_noisy_raw_tracks_identity() {
        let sweep = run_sweep(&config(1.0, 20), CoefficientMode::Raw).unwrap();
        let report = SimulationReport::from_sweep(&sweep).unwrap();
        let identity = report.identity.unwrap();
        assert!((identity.slope - 1.0).abs() < 0.05);
        assert!(identity.r_squared > 0.99);
        assert_eq!(report.design_tests.len(), 5);
        for t in &report.design_tests {
            assert!((0.0..=1.0).contains(&t.p_value));
        }
    }

    #[test]
    fn test_report_string() {
        let sweep = run_sweep(&config(1.0, 5), CoefficientMode::Raw).unwrap();
        let report = SimulationReport::from_sweep(&sweep).unwrap();
        let text = report.to_report_string();
        assert!(text.contains("raw coefficients"));
        assert!(text.contains("indifference"));
        assert!(text.contains("slope"));
        assert!(report.summary(2.0, DesignKind::Equal).is_some());
    }

    #[test]
    fn test_single_lambda_noiseless_keeps_summaries() {
        let config = SimulationConfig {
            lambda_start: 2.0,
            lambda_stop: 2.0,
            lambda_step: 0.25,
            replicates: 100,
            noise_sd: 0.0,
            seed: 42,
        };
        let sweep = run_sweep(&config, CoefficientMode::Raw).unwrap();
        assert!(identity_line(&sweep).is_none());

        let report = SimulationReport::from_sweep(&sweep).unwrap();
        assert!(report.identity.is_none());
        let indifference = report.summary(2.0, DesignKind::Indifference).unwrap();
        assert!((indifference.mean_gain - 1.0).abs() < 1e-6);
        assert!((indifference.mean_loss + 2.0).abs() < 1e-6);
        assert!(indifference.rmse < 1e-6);
        assert!(report.to_report_string().contains("undefined"));
    }

    #[test]
    fn test_single_replicate_single_lambda() {
        let config = SimulationConfig {
            lambda_start: 3.0,
            lambda_stop: 3.0,
            lambda_step: 0.25,
            replicates: 1,
            noise_sd: 1.0,
            seed: 5,
        };
        let sweep = run_sweep(&config, CoefficientMode::Raw).unwrap();
        let report = SimulationReport::from_sweep(&sweep).unwrap();
        assert!(report.identity.is_none());
        assert!(report.design_tests.is_empty());
        assert_eq!(report.summaries.len(), 2);
    }
}
