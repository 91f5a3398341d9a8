//! Analysis configuration
//!
//! Resolution order (later wins): built-in defaults, optional TOML file,
//! `NARPS_BASEDIR` environment variable, command-line `--basedir`.

use crate::model::optim::{OptimizerKind, OptimizerSettings};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the base directory
pub const BASEDIR_ENV: &str = "NARPS_BASEDIR";

/// Base directory used when neither the environment nor the CLI set one
pub const DEFAULT_BASEDIR: &str = "/data/NARPS";

/// Settings for the random-intercept logistic model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmmConfig {
    /// Optimizer tried first on the Laplace deviance
    pub primary_optimizer: OptimizerKind,
    /// Stopping rules for Newton
    pub newton: OptimizerSettings,
    /// Stopping rules for the Nelder-Mead fallback
    pub nelder_mead: OptimizerSettings,
    /// PIRLS iterations per deviance evaluation
    pub pirls_max_iterations: usize,
    /// Starting team standard deviation
    pub initial_theta: f64,
}

impl Default for GlmmConfig {
    fn default() -> Self {
        Self {
            primary_optimizer: OptimizerKind::Newton,
            newton: OptimizerSettings {
                max_iterations: 100,
                x_tolerance: 1e-7,
                f_tolerance: 1e-9,
            },
            nelder_mead: OptimizerSettings {
                max_iterations: 1000,
                x_tolerance: 1e-7,
                f_tolerance: 1e-9,
            },
            pirls_max_iterations: 100,
            initial_theta: 1.0,
        }
    }
}

/// Settings for the gamble-design simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub lambda_start: f64,
    pub lambda_stop: f64,
    pub lambda_step: f64,
    pub replicates: usize,
    /// Standard deviation of the Gaussian response noise
    pub noise_sd: f64,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            lambda_start: 1.0,
            lambda_stop: 5.0,
            lambda_step: 0.25,
            replicates: 100,
            noise_sd: 1.0,
            seed: 42,
        }
    }
}

impl SimulationConfig {
    /// True loss-aversion values of the sweep (inclusive of both ends)
    pub fn lambda_grid(&self) -> Vec<f64> {
        let steps = ((self.lambda_stop - self.lambda_start) / self.lambda_step).round() as usize;
        (0..=steps)
            .map(|i| self.lambda_start + i as f64 * self.lambda_step)
            .collect()
    }
}

/// Top-level configuration shared by every pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Root of the input and output tree
    pub basedir: PathBuf,
    /// Output directory, relative to `basedir`
    pub output_subdir: PathBuf,
    /// Significance level for post-hoc letter groups and report flags
    pub significance_level: f64,
    /// Hypothesis whose team rows are joined to the pattern distances
    pub distance_hypothesis: u8,
    /// Prior scale for the per-hypothesis regularised logistic models
    pub prior_scale: f64,
    /// Target false discovery rate of the consensus analysis
    pub fdr_q: f64,
    pub glmm: GlmmConfig,
    pub simulation: SimulationConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            basedir: PathBuf::from(DEFAULT_BASEDIR),
            output_subdir: PathBuf::from("output"),
            significance_level: 0.05,
            distance_hypothesis: 1,
            prior_scale: 2.5,
            fdr_q: 0.05,
            glmm: GlmmConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load defaults, then the TOML file, then environment and CLI overrides
    pub fn resolve(config_file: Option<&Path>, basedir: Option<PathBuf>) -> Result<Self> {
        let mut config = match config_file {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };

        if let Ok(dir) = std::env::var(BASEDIR_ENV) {
            if !dir.is_empty() {
                config.basedir = PathBuf::from(dir);
            }
        }
        if let Some(dir) = basedir {
            config.basedir = dir;
        }

        config.validate().map_err(|e| anyhow::anyhow!(e))?;
        tracing::debug!(basedir = %config.basedir.display(), "configuration resolved");
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.basedir.join(&self.output_subdir)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.basedir.join("metadata").join("all_metadata.csv")
    }

    pub fn distance_path(&self) -> PathBuf {
        self.basedir.join("metadata").join("mean_pattern_distance.csv")
    }

    pub fn consensus_path(&self, hypothesis: u8) -> PathBuf {
        self.basedir
            .join("consensus")
            .join(format!("hypo{}_data.csv", hypothesis))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.significance_level) {
            return Err(format!(
                "significance_level must be in [0, 1], got {}",
                self.significance_level
            ));
        }

        if !(0.0..=1.0).contains(&self.fdr_q) {
            return Err(format!("fdr_q must be in [0, 1], got {}", self.fdr_q));
        }

        if !(1..=9).contains(&self.distance_hypothesis) {
            return Err(format!(
                "distance_hypothesis must be in 1..=9, got {}",
                self.distance_hypothesis
            ));
        }

        if !(self.prior_scale > 0.0) {
            return Err(format!(
                "prior_scale must be positive, got {}",
                self.prior_scale
            ));
        }

        if !(self.glmm.initial_theta >= 0.0) {
            return Err(format!(
                "glmm.initial_theta must be non-negative, got {}",
                self.glmm.initial_theta
            ));
        }

        if self.glmm.pirls_max_iterations == 0 {
            return Err("glmm.pirls_max_iterations must be at least 1".to_string());
        }

        let sim = &self.simulation;
        if !(sim.lambda_step > 0.0) || sim.lambda_stop < sim.lambda_start {
            return Err(format!(
                "simulation lambda grid is empty: {}..={} step {}",
                sim.lambda_start, sim.lambda_stop, sim.lambda_step
            ));
        }

        if sim.replicates == 0 {
            return Err("simulation.replicates must be at least 1".to_string());
        }

        if !(sim.noise_sd >= 0.0) || !sim.noise_sd.is_finite() {
            return Err(format!(
                "simulation.noise_sd must be non-negative, got {}",
                sim.noise_sd
            ));
        }

        Ok(())
    }
}
