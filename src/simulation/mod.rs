//! Loss-aversion design simulation
//!
//! Compares how well two gamble designs recover the loss-aversion parameter
//! lambda of the model `response = gain - lambda * loss + noise`, on raw and
//! on standardized coefficients.

pub mod design;
pub mod engine;
pub mod summary;

pub use design::{DesignKind, GambleDesign};
pub use engine::{fit_design, run_sweep, CoefficientMode, LossAversionFit, ReplicateEstimate, Sweep};
pub use summary::{identity_line, DesignTest, IdentityLine, LambdaSummary, SimulationReport};

use crate::config::SimulationConfig;
use crate::model::FitError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Response has {actual} values, design has {expected} trials")]
    Dimension { expected: usize, actual: usize },

    #[error("Cannot standardize a constant column")]
    ConstantColumn,

    #[error("Invalid noise standard deviation {0}")]
    InvalidNoise(f64),

    #[error(transparent)]
    Fit(#[from] FitError),
}

pub type Result<T> = std::result::Result<T, SimulationError>;

/// Run the raw and the standardized sweep and summarise both
pub fn run(config: &SimulationConfig) -> Result<Vec<SimulationReport>> {
    CoefficientMode::ALL
        .iter()
        .map(|&mode| {
            let sweep = run_sweep(config, mode)?;
            SimulationReport::from_sweep(&sweep)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_produces_both_modes() {
        let config = SimulationConfig {
            lambda_start: 2.0,
            lambda_stop: 2.0,
            lambda_step: 0.25,
            replicates: 3,
            noise_sd: 0.5,
            seed: 42,
        };
        let reports = run(&config).unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].mode, CoefficientMode::Raw);
        assert_eq!(reports[1].mode, CoefficientMode::Standardized);
        assert_eq!(reports[0].summaries.len(), 2);
    }

    #[test]
    fn test_negative_noise_rejected() {
        let config = SimulationConfig {
            noise_sd: -1.0,
            ..SimulationConfig::default()
        };
        assert!(matches!(run(&config), Err(SimulationError::InvalidNoise(_))));
    }
}
