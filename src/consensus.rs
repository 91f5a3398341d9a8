//! Consensus analysis of team result maps
//!
//! Input is a teams x voxels matrix of unthresholded statistics for one
//! hypothesis. Team maps are correlated (shared data, similar pipelines), so
//! the one-sample test uses the inter-team correlation matrix `Q` to inflate
//! the variance of the mean:
//!
//! ```text
//! VarMean = v * 1'Q1 / n^2
//! T_k     = (mean_k - m) / sqrt(VarMean) * sqrt(v) + m
//! p_k     = 1 - Phi(T_k)
//! ```
//!
//! where `m` is the grand mean and `v` the mean within-team variance.
//! Voxel-wise p-values are controlled with the two-stage Benjamini-Hochberg
//! procedure, and between-team heterogeneity is summarised as tau.

use crate::data::{self, DelimitedTable};
use crate::stats::{benjamini_hochberg, normal_cdf, DescriptiveSummary};
use nalgebra::DMatrix;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Consensus matrix needs at least 2 teams and 1 voxel, got {teams}x{voxels}")]
    TooSmall { teams: usize, voxels: usize },

    #[error("Row {row} has {actual} values, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Team row {0} has zero variance; correlation is undefined")]
    ConstantRow(usize),

    #[error(transparent)]
    Data(#[from] data::DataError),
}

pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Voxel-wise results for one hypothesis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusResult {
    pub hypothesis: u8,
    pub n_teams: usize,
    pub n_voxels: usize,
    pub grand_mean: f64,
    pub mean_variance: f64,
    /// Mean of the upper-triangle inter-team correlations
    pub mean_correlation: f64,
    pub t: Vec<f64>,
    pub p: Vec<f64>,
    pub fdr_adjusted: Vec<f64>,
    pub significant: Vec<bool>,
    pub tau: Vec<f64>,
}

/// One-line summary per hypothesis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusSummary {
    pub hypothesis: u8,
    pub n_teams: usize,
    pub n_voxels: usize,
    pub grand_mean: f64,
    pub mean_variance: f64,
    pub mean_correlation: f64,
    pub significant_voxels: usize,
    pub median_tau: f32,
    pub max_tau: f32,
}

impl ConsensusResult {
    pub fn summary(&self) -> ConsensusSummary {
        let tau = DescriptiveSummary::from_samples(&self.tau);
        ConsensusSummary {
            hypothesis: self.hypothesis,
            n_teams: self.n_teams,
            n_voxels: self.n_voxels,
            grand_mean: self.grand_mean,
            mean_variance: self.mean_variance,
            mean_correlation: self.mean_correlation,
            significant_voxels: self.significant.iter().filter(|&&s| s).count(),
            median_tau: tau.as_ref().map(|t| t.median).unwrap_or(f32::NAN),
            max_tau: tau.as_ref().map(|t| t.max).unwrap_or(f32::NAN),
        }
    }
}

impl ConsensusSummary {
    pub fn to_report_string(&self) -> String {
        let mut report = String::new();
        let _ = writeln!(
            report,
            "hypothesis {}: {} teams x {} voxels",
            self.hypothesis, self.n_teams, self.n_voxels
        );
        let _ = writeln!(
            report,
            "  mean = {:.6}, var = {:.6}, mean_cc = {:.6}",
            self.grand_mean, self.mean_variance, self.mean_correlation
        );
        let _ = writeln!(
            report,
            "  {} voxels significant at FDR corrected p<.05",
            self.significant_voxels
        );
        let _ = writeln!(
            report,
            "  median tau {:.3}, max tau {:.3}",
            self.median_tau, self.max_tau
        );
        report
    }
}

/// Load `hypo<N>_data.csv` (no header, one team per row)
pub fn load_matrix(path: &Path) -> Result<DMatrix<f64>> {
    let text = data::read_file(path)?;
    let rows = DelimitedTable::parse_matrix(&text)?;
    let matrix = to_matrix(&rows)?;
    tracing::debug!(
        path = %path.display(),
        teams = matrix.nrows(),
        voxels = matrix.ncols(),
        "consensus matrix loaded"
    );
    Ok(matrix)
}

fn to_matrix(rows: &[Vec<f64>]) -> Result<DMatrix<f64>> {
    let voxels = rows.first().map(Vec::len).unwrap_or(0);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != voxels {
            return Err(ConsensusError::Ragged {
                row: i + 1,
                expected: voxels,
                actual: row.len(),
            });
        }
    }
    Ok(DMatrix::from_fn(rows.len(), voxels, |i, j| rows[i][j]))
}

/// Run the consensus analysis on a teams x voxels matrix
pub fn analyze(hypothesis: u8, data: &DMatrix<f64>, q: f64) -> Result<ConsensusResult> {
    let (n, voxels) = data.shape();
    if n < 2 || voxels == 0 {
        return Err(ConsensusError::TooSmall {
            teams: n,
            voxels,
        });
    }

    let grand_mean = data.mean();
    // Population variance of each team map, averaged over teams
    let mean_variance = (0..n)
        .map(|i| {
            let row = data.row(i);
            let m = row.mean();
            row.iter().map(|v| (v - m).powi(2)).sum::<f64>() / voxels as f64
        })
        .sum::<f64>()
        / n as f64;
    let q_matrix = correlation_matrix(data)?;

    let mut off_diagonal = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        for j in (i + 1)..n {
            off_diagonal.push(q_matrix[(i, j)]);
        }
    }
    let mean_correlation = crate::stats::mean(&off_diagonal);

    let (t, p) = correlated_t(data, grand_mean, mean_variance, &q_matrix);
    let (fdr_adjusted, significant) = two_stage_fdr(&p, q);
    let tau = tau(data, &q_matrix);

    tracing::debug!(
        hypothesis,
        significant = significant.iter().filter(|&&s| s).count(),
        "consensus analysis complete"
    );

    Ok(ConsensusResult {
        hypothesis,
        n_teams: n,
        n_voxels: voxels,
        grand_mean,
        mean_variance,
        mean_correlation,
        t,
        p,
        fdr_adjusted,
        significant,
        tau,
    })
}

/// Pearson correlation between rows
pub fn correlation_matrix(data: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let (n, voxels) = data.shape();
    let mut centered = data.clone();
    for i in 0..n {
        let m = data.row(i).mean();
        let mut row = centered.row_mut(i);
        row.add_scalar_mut(-m);
        let norm = row.norm();
        if !(norm > 0.0) || voxels < 2 {
            return Err(ConsensusError::ConstantRow(i + 1));
        }
        row /= norm;
    }
    let mut q = &centered * centered.transpose();
    for i in 0..n {
        q[(i, i)] = 1.0;
    }
    Ok(q)
}

/// One-sample t-test for correlated observations, one statistic per column
///
/// Assumes infinite degrees of freedom (variance estimated over the whole
/// map), so p-values are upper-tail normal.
pub fn correlated_t(
    data: &DMatrix<f64>,
    mean: f64,
    variance: f64,
    q: &DMatrix<f64>,
) -> (Vec<f64>, Vec<f64>) {
    let n = data.nrows() as f64;
    let var_mean = variance * q.sum() / (n * n);
    let scale = variance.sqrt() / var_mean.sqrt();

    data.column_iter()
        .map(|column| {
            let t = (column.mean() - mean) * scale + mean;
            (t, 1.0 - normal_cdf(t))
        })
        .unzip()
}

/// Two-stage Benjamini-Hochberg (Benjamini, Krieger & Yekutieli 2006)
///
/// The first stage runs BH at `q / (1 + q)` to estimate the number of true
/// nulls `m0`; the second rescales the BH-adjusted p-values by `m0 / m`.
/// Returns adjusted p-values (capped at 1) and the rejection mask, which
/// rejects exactly the hypotheses whose adjusted p-value is at most `q`.
pub fn two_stage_fdr(p_values: &[f64], q: f64) -> (Vec<f64>, Vec<bool>) {
    let m = p_values.len();
    if m == 0 {
        return (Vec::new(), Vec::new());
    }
    let bh = benjamini_hochberg(p_values);
    let first_stage = q / (1.0 + q);
    let r1 = bh.iter().filter(|&&p| p <= first_stage).count();

    let factor = if r1 == 0 || r1 == m {
        1.0 + q
    } else {
        (m - r1) as f64 / m as f64 * (1.0 + q)
    };
    let adjusted: Vec<f64> = bh.iter().map(|p| (p * factor).min(1.0)).collect();
    let reject = adjusted.iter().map(|&p| p <= q).collect();
    (adjusted, reject)
}

/// Between-team standard deviation per voxel
///
/// `tau_k^2 = Y_k' R Y_k / tr(RQ)` with the centering matrix `R = I - 11'/n`.
pub fn tau(data: &DMatrix<f64>, q: &DMatrix<f64>) -> Vec<f64> {
    let n = data.nrows() as f64;
    let sampvar = q.trace() - q.sum() / n;
    data.column_iter()
        .map(|column| {
            let m = column.mean();
            let ss = column.iter().map(|v| (v - m).powi(2)).sum::<f64>();
            (ss / sampvar).sqrt()
        })
        .collect()
}
