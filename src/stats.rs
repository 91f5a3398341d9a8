//! Shared statistical helpers
//!
//! Descriptive summaries (Trueno vectors + aprender quantiles), variance
//! stabilising transforms, distribution tail areas and p-value adjustment.

use aprender::stats::DescriptiveStats;
use serde::Serialize;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal, StudentsT};
use trueno::Vector;

/// Descriptive summary of a sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescriptiveSummary {
    pub count: usize,
    pub mean: f32,
    pub stddev: f32,
    pub min: f32,
    pub max: f32,
    pub median: f32,
}

impl DescriptiveSummary {
    /// Summarise a sample using Trueno for the moments
    ///
    /// Trueno reports the population standard deviation (divide by n).
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let values: Vec<f32> = samples.iter().map(|&s| s as f32).collect();
        let v = Vector::from_slice(&values);

        let mean = v.mean().unwrap_or(0.0);
        let stddev = v.stddev().unwrap_or(0.0);
        let min = v.min().unwrap_or(0.0);
        let max = v.max().unwrap_or(0.0);
        let median = median(&v).unwrap_or(mean);

        Some(Self {
            count: values.len(),
            mean,
            stddev,
            min,
            max,
            median,
        })
    }
}

/// Median via aprender's R-7 quantile
pub fn median(vector: &Vector<f32>) -> anyhow::Result<f32> {
    let stats = DescriptiveStats::new(vector);
    stats
        .quantile(0.5)
        .map_err(|e| anyhow::anyhow!("Failed to compute median: {}", e))
}

/// Arithmetic mean in double precision
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1 denominator)
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Fisher's Z transform, `0.5 * ln((1 + r) / (1 - r))`
///
/// NaN inputs are recoded to 0 so that teams without a usable distance
/// contribute the null value.
pub fn fisher_z(r: f64) -> f64 {
    if r.is_nan() {
        return 0.0;
    }
    r.atanh()
}

/// Back-transform of [`fisher_z`]
pub fn inverse_fisher_z(z: f64) -> f64 {
    z.tanh()
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    Normal::new(0.0, 1.0).map(|n| n.cdf(x)).unwrap_or(f64::NAN)
}

/// Standard normal quantile function
pub fn normal_quantile(p: f64) -> f64 {
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(p))
        .unwrap_or(f64::NAN)
}

/// Two-sided p-value for a Wald statistic
///
/// `df = None` uses the asymptotic normal reference, otherwise Student's t.
pub fn two_sided_p_value(statistic: f64, df: Option<f64>) -> f64 {
    if !statistic.is_finite() {
        return if statistic.is_nan() { f64::NAN } else { 0.0 };
    }
    let tail = match df {
        None => 1.0 - normal_cdf(statistic.abs()),
        Some(df) if df > 0.0 => StudentsT::new(0.0, 1.0, df)
            .map(|t| 1.0 - t.cdf(statistic.abs()))
            .unwrap_or(f64::NAN),
        Some(_) => f64::NAN,
    };
    (2.0 * tail).min(1.0)
}

/// Upper tail area of the chi-squared distribution
pub fn chi_squared_sf(statistic: f64, df: f64) -> f64 {
    if df <= 0.0 || statistic.is_nan() {
        return f64::NAN;
    }
    if statistic <= 0.0 {
        return 1.0;
    }
    ChiSquared::new(df)
        .map(|d| 1.0 - d.cdf(statistic))
        .unwrap_or(f64::NAN)
}

/// Holm step-down adjustment
pub fn holm_adjust(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut adjusted = vec![0.0; m];
    let mut running = 0.0_f64;
    for (rank, &idx) in order.iter().enumerate() {
        let candidate = ((m - rank) as f64 * p_values[idx]).min(1.0);
        running = running.max(candidate);
        adjusted[idx] = running;
    }
    adjusted
}

/// Benjamini-Hochberg step-up adjustment
pub fn benjamini_hochberg(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| p_values[a].total_cmp(&p_values[b]));

    let mut adjusted = vec![0.0; m];
    let mut running = 1.0_f64;
    for (rank, &idx) in order.iter().enumerate().rev() {
        let candidate = p_values[idx] * m as f64 / (rank + 1) as f64;
        running = running.min(candidate);
        adjusted[idx] = running.min(1.0);
    }
    adjusted
}
