// Estimated marginal means and compact letter display for factor covariates
//
// Reference grid: numeric columns at their sample mean, every other factor
// averaged over its levels with equal weight. Means are on the link scale
// (logit for the binomial models). Pairwise contrasts use Wald tests (z for
// asymptotic fits, t when the model has residual degrees of freedom) with
// Holm-adjusted p-values.

use super::{Covariate, CovariateKind, FitError, FittedModel, ModelFrame, Result};
use crate::stats::{holm_adjust, two_sided_p_value};
use nalgebra::DVector;
use serde::Serialize;
use std::collections::BTreeSet;

/// Marginal mean of one factor level
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelMean {
    pub level: String,
    pub estimate: f64,
    pub std_error: f64,
    /// Compact letter display; levels sharing a letter are not distinguishable
    pub group: String,
}

/// Pairwise difference between two levels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairwiseContrast {
    pub first: String,
    pub second: String,
    pub estimate: f64,
    pub std_error: f64,
    pub statistic: f64,
    pub p_value: f64,
    pub adjusted_p_value: f64,
}

/// Post-hoc summary for one factor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostHoc {
    pub covariate: Covariate,
    /// Levels sorted by ascending marginal mean
    pub levels: Vec<LevelMean>,
    pub contrasts: Vec<PairwiseContrast>,
}

/// Marginal means, pairwise contrasts and letter groups for a factor term
pub fn estimated_marginal_means<F: FittedModel>(
    fit: &F,
    frame: &ModelFrame,
    covariate: Covariate,
    alpha: f64,
) -> Result<PostHoc> {
    if covariate.kind() != CovariateKind::Factor {
        return Err(FitError::InvalidInput(format!(
            "{} is not a factor",
            covariate
        )));
    }
    let term = frame.term(covariate).ok_or_else(|| {
        FitError::InvalidInput(format!("{} is not part of the model", covariate))
    })?;
    let beta = fit.estimates();
    let covariance = fit.covariance();
    let p = frame.n_columns();
    if beta.len() != p || covariance.nrows() != p {
        return Err(FitError::InvalidInput(
            "fit does not belong to this frame".into(),
        ));
    }

    // Shared part of the reference grid row
    let mut base = DVector::zeros(p);
    base[0] = 1.0;
    for other in &frame.terms {
        if other.covariate == covariate {
            continue;
        }
        match other.covariate.kind() {
            CovariateKind::Numeric => {
                let col = other.columns.start;
                base[col] = frame.x.column(col).mean();
            }
            CovariateKind::Factor => {
                let weight = 1.0 / other.levels.len() as f64;
                for col in other.columns.clone() {
                    base[col] = weight;
                }
            }
        }
    }

    let grid: Vec<DVector<f64>> = (0..term.levels.len())
        .map(|k| {
            let mut row = base.clone();
            if k > 0 {
                row[term.columns.start + k - 1] = 1.0;
            }
            row
        })
        .collect();

    let quadratic = |l: &DVector<f64>| (l.transpose() * covariance * l)[0].max(0.0).sqrt();

    let mut means: Vec<LevelMean> = term
        .levels
        .iter()
        .zip(&grid)
        .map(|(level, l)| LevelMean {
            level: level.clone(),
            estimate: l.dot(&beta),
            std_error: quadratic(l),
            group: String::new(),
        })
        .collect();

    // Sort levels (and their grid rows) by estimate
    let mut order: Vec<usize> = (0..means.len()).collect();
    order.sort_by(|&a, &b| means[a].estimate.total_cmp(&means[b].estimate));
    means = order.iter().map(|&i| means[i].clone()).collect();
    let grid: Vec<DVector<f64>> = order.iter().map(|&i| grid[i].clone()).collect();

    let df = fit.residual_df();
    let mut contrasts = Vec::new();
    let mut pairs = Vec::new();
    for a in 0..means.len() {
        for b in (a + 1)..means.len() {
            let l = &grid[a] - &grid[b];
            let estimate = l.dot(&beta);
            let std_error = quadratic(&l);
            let statistic = estimate / std_error;
            contrasts.push(PairwiseContrast {
                first: means[a].level.clone(),
                second: means[b].level.clone(),
                estimate,
                std_error,
                statistic,
                p_value: two_sided_p_value(statistic, df),
                adjusted_p_value: f64::NAN,
            });
            pairs.push((a, b));
        }
    }

    let raw: Vec<f64> = contrasts.iter().map(|c| c.p_value).collect();
    let adjusted = holm_adjust(&raw);
    let mut significant = Vec::new();
    for ((contrast, adj), &pair) in contrasts.iter_mut().zip(adjusted).zip(&pairs) {
        contrast.adjusted_p_value = adj;
        if adj < alpha {
            significant.push(pair);
        }
    }

    let letters = compact_letter_display(means.len(), &significant);
    for (mean, group) in means.iter_mut().zip(letters) {
        mean.group = group;
    }

    Ok(PostHoc {
        covariate,
        levels: means,
        contrasts,
    })
}

/// Insert-and-absorb compact letter display
///
/// `significant` lists index pairs of levels that differ. Returns one letter
/// string per level; two levels share a letter iff no chain of significant
/// differences separates them within a group.
pub fn compact_letter_display(n_levels: usize, significant: &[(usize, usize)]) -> Vec<String> {
    if n_levels == 0 {
        return Vec::new();
    }
    let mut groups: Vec<BTreeSet<usize>> = vec![(0..n_levels).collect()];

    for &(i, j) in significant {
        let mut next = Vec::with_capacity(groups.len() + 1);
        for group in groups {
            if group.contains(&i) && group.contains(&j) {
                let mut without_i = group.clone();
                without_i.remove(&i);
                let mut without_j = group;
                without_j.remove(&j);
                next.push(without_i);
                next.push(without_j);
            } else {
                next.push(group);
            }
        }
        groups = absorb(next);
    }

    groups.sort_by_key(|g| g.iter().next().copied().unwrap_or(usize::MAX));

    let mut letters = vec![String::new(); n_levels];
    for (k, group) in groups.iter().enumerate() {
        let letter = letter_for(k);
        for &level in group {
            letters[level].push_str(&letter);
        }
    }
    letters
}

/// Drop empty groups and groups contained in another group
fn absorb(groups: Vec<BTreeSet<usize>>) -> Vec<BTreeSet<usize>> {
    let mut kept: Vec<BTreeSet<usize>> = Vec::with_capacity(groups.len());
    for (idx, group) in groups.iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        let dominated = groups.iter().enumerate().any(|(other_idx, other)| {
            other_idx != idx
                && group.is_subset(other)
                && (group.len() < other.len() || other_idx < idx)
        });
        if !dominated {
            kept.push(group.clone());
        }
    }
    kept
}

fn letter_for(k: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    if k < ALPHABET.len() {
        (ALPHABET[k] as char).to_string()
    } else {
        format!("{}{}", ALPHABET[k % ALPHABET.len()] as char, k / ALPHABET.len())
    }
}
