//! Optimizers for variance-component estimation
//!
//! The mixed model profiles its fixed effects out of the Laplace deviance and
//! minimises what remains over the random-effect scale. [`newton`] is tried
//! first; [`nelder_mead`] is the derivative-free fallback used when Newton
//! does not converge.

use super::{FitError, Result};
use serde::{Deserialize, Serialize};

/// Which optimizer produced an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptimizerKind {
    /// Newton-Raphson with finite-difference derivatives
    Newton,
    /// Nelder-Mead simplex (derivative-free)
    NelderMead,
}

impl std::fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizerKind::Newton => f.write_str("newton"),
            OptimizerKind::NelderMead => f.write_str("nelder-mead"),
        }
    }
}

/// Stopping rules shared by both optimizers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub max_iterations: usize,
    /// Convergence tolerance on the parameter
    pub x_tolerance: f64,
    /// Convergence tolerance on the objective
    pub f_tolerance: f64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            x_tolerance: 1e-7,
            f_tolerance: 1e-9,
        }
    }
}

/// Minimum found by an optimizer
#[derive(Debug, Clone, PartialEq)]
pub struct Optimum {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub optimizer: OptimizerKind,
}

/// Minimise a univariate function on `[lower, inf)` by Newton-Raphson
///
/// Derivatives are central differences (forward differences at the bound).
/// Non-convex steps fall back to a damped gradient step; every step is
/// backtracked until the objective decreases.
pub fn newton<F>(mut f: F, x0: f64, lower: f64, settings: &OptimizerSettings) -> Result<Optimum>
where
    F: FnMut(f64) -> Result<f64>,
{
    let mut x = x0.max(lower);
    let mut fx = f(x)?;
    if !fx.is_finite() {
        return Err(FitError::NonConvergence(format!(
            "newton: objective is not finite at start value {}",
            x
        )));
    }

    for iteration in 1..=settings.max_iterations {
        let h = 1e-4 * x.abs().max(1.0);
        let (d1, d2) = if x - h >= lower {
            let up = f(x + h)?;
            let down = f(x - h)?;
            ((up - down) / (2.0 * h), (up - 2.0 * fx + down) / (h * h))
        } else {
            let up = f(x + h)?;
            let up2 = f(x + 2.0 * h)?;
            ((up - fx) / h, (up2 - 2.0 * up + fx) / (h * h))
        };
        if !d1.is_finite() || !d2.is_finite() {
            return Err(FitError::NonConvergence(
                "newton: non-finite derivative".into(),
            ));
        }

        // Minimum on the boundary
        if x <= lower && d1 >= 0.0 {
            return Ok(Optimum {
                x: vec![x],
                value: fx,
                iterations: iteration,
                optimizer: OptimizerKind::Newton,
            });
        }

        let mut step = if d2 > 0.0 {
            -d1 / d2
        } else {
            -d1.signum() * 0.5 * x.abs().max(1.0)
        };

        let mut accepted = None;
        for _ in 0..40 {
            let candidate = (x + step).max(lower);
            let value = f(candidate)?;
            if value.is_finite() && value <= fx {
                accepted = Some((candidate, value));
                break;
            }
            step *= 0.5;
        }

        let Some((candidate, value)) = accepted else {
            if step.abs() < settings.x_tolerance {
                return Ok(Optimum {
                    x: vec![x],
                    value: fx,
                    iterations: iteration,
                    optimizer: OptimizerKind::Newton,
                });
            }
            return Err(FitError::NonConvergence(
                "newton: line search failed to decrease the objective".into(),
            ));
        };

        let moved = (candidate - x).abs();
        let improved = fx - value;
        x = candidate;
        fx = value;
        if moved < settings.x_tolerance || improved < settings.f_tolerance {
            return Ok(Optimum {
                x: vec![x],
                value: fx,
                iterations: iteration,
                optimizer: OptimizerKind::Newton,
            });
        }
    }

    Err(FitError::NonConvergence(format!(
        "newton: no convergence after {} iterations",
        settings.max_iterations
    )))
}

/// Minimise a multivariate function with the Nelder-Mead simplex
///
/// Failed evaluations are treated as `+inf` so the simplex moves away from
/// them. Standard coefficients: reflection 1, expansion 2, contraction 0.5,
/// shrink 0.5.
pub fn nelder_mead<F>(
    mut f: F,
    x0: &[f64],
    initial_step: f64,
    settings: &OptimizerSettings,
) -> Result<Optimum>
where
    F: FnMut(&[f64]) -> Result<f64>,
{
    let n = x0.len();
    if n == 0 {
        return Err(FitError::InvalidInput(
            "nelder-mead needs at least one parameter".into(),
        ));
    }
    let mut eval = |x: &[f64]| match f(x) {
        Ok(v) if v.is_finite() => v,
        _ => f64::INFINITY,
    };

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(x0.to_vec());
    for j in 0..n {
        let mut vertex = x0.to_vec();
        vertex[j] += if vertex[j] != 0.0 {
            initial_step * vertex[j].abs().max(1.0)
        } else {
            initial_step
        };
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| eval(v)).collect();

    for iteration in 1..=settings.max_iterations {
        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let spread = values[n] - values[0];
        let size = simplex[1..]
            .iter()
            .flat_map(|v| v.iter().zip(&simplex[0]).map(|(a, b)| (a - b).abs()))
            .fold(0.0_f64, f64::max);
        if values[0].is_finite() && spread.abs() <= settings.f_tolerance && size <= settings.x_tolerance
        {
            return Ok(Optimum {
                x: simplex[0].clone(),
                value: values[0],
                iterations: iteration,
                optimizer: OptimizerKind::NelderMead,
            });
        }

        let centroid: Vec<f64> = (0..n)
            .map(|j| simplex[..n].iter().map(|v| v[j]).sum::<f64>() / n as f64)
            .collect();
        let toward = |coef: f64, worst: &[f64]| -> Vec<f64> {
            centroid
                .iter()
                .zip(worst)
                .map(|(c, w)| c + coef * (w - c))
                .collect()
        };

        let worst = simplex[n].clone();
        let reflected = toward(-1.0, &worst);
        let f_reflected = eval(&reflected);

        if f_reflected < values[0] {
            let expanded = toward(-2.0, &worst);
            let f_expanded = eval(&expanded);
            if f_expanded < f_reflected {
                simplex[n] = expanded;
                values[n] = f_expanded;
            } else {
                simplex[n] = reflected;
                values[n] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[n - 1] {
            simplex[n] = reflected;
            values[n] = f_reflected;
            continue;
        }

        let (contracted, f_contracted) = if f_reflected < values[n] {
            let outside = toward(-0.5, &worst);
            let value = eval(&outside);
            (outside, value)
        } else {
            let inside = toward(0.5, &worst);
            let value = eval(&inside);
            (inside, value)
        };
        if f_contracted < values[n].min(f_reflected) {
            simplex[n] = contracted;
            values[n] = f_contracted;
            continue;
        }

        let best = simplex[0].clone();
        for i in 1..=n {
            simplex[i] = simplex[i]
                .iter()
                .zip(&best)
                .map(|(v, b)| b + 0.5 * (v - b))
                .collect();
            values[i] = eval(&simplex[i]);
        }
    }

    Err(FitError::NonConvergence(format!(
        "nelder-mead: no convergence after {} iterations",
        settings.max_iterations
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> OptimizerSettings {
        OptimizerSettings {
            max_iterations: 500,
            x_tolerance: 1e-9,
            f_tolerance: 1e-12,
        }
    }

    #[test]
    fn test_newton_quadratic() {
        let opt = newton(|x| Ok((x - 2.5).powi(2) + 1.0), 0.5, 0.0, &settings()).unwrap();
        assert!((opt.x[0] - 2.5).abs() < 1e-4);
        assert!((opt.value - 1.0).abs() < 1e-8);
        assert_eq!(opt.optimizer, OptimizerKind::Newton);
    }

    #[test]
    fn test_newton_boundary_minimum() {
        // Unconstrained minimum at -1, constrained to x >= 0
        let opt = newton(|x| Ok((x + 1.0).powi(2)), 2.0, 0.0, &settings()).unwrap();
        assert!(opt.x[0].abs() < 1e-6);
    }

    #[test]
    fn test_newton_iteration_cap_reports_non_convergence() {
        let capped = OptimizerSettings {
            max_iterations: 1,
            x_tolerance: 1e-12,
            f_tolerance: 0.0,
        };
        let err = newton(|x| Ok((x - 3.0).powi(4) + (x - 3.0).powi(2)), 0.0, 0.0, &capped)
            .unwrap_err();
        assert!(matches!(err, FitError::NonConvergence(_)));
    }

    #[test]
    fn test_newton_propagates_evaluation_errors() {
        let err = newton(
            |x| {
                if x > 1.0 {
                    Err(FitError::NonConvergence("inner".into()))
                } else {
                    Ok(-x)
                }
            },
            0.5,
            0.0,
            &settings(),
        )
        .unwrap_err();
        assert!(matches!(err, FitError::NonConvergence(_)));
    }

    #[test]
    fn test_nelder_mead_rosenbrock() {
        let rosenbrock = |x: &[f64]| Ok((1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0] * x[0]).powi(2));
        let opt = nelder_mead(
            rosenbrock,
            &[-1.2, 1.0],
            0.5,
            &OptimizerSettings {
                max_iterations: 5000,
                x_tolerance: 1e-8,
                f_tolerance: 1e-12,
            },
        )
        .unwrap();
        assert!((opt.x[0] - 1.0).abs() < 1e-3);
        assert!((opt.x[1] - 1.0).abs() < 1e-3);
        assert_eq!(opt.optimizer, OptimizerKind::NelderMead);
    }

    #[test]
    fn test_nelder_mead_one_dimensional() {
        let opt = nelder_mead(|x| Ok((x[0].abs() - 0.7).powi(2)), &[1.0], 0.1, &settings()).unwrap();
        assert!((opt.x[0].abs() - 0.7).abs() < 1e-4);
    }

    #[test]
    fn test_nelder_mead_avoids_failed_region() {
        let opt = nelder_mead(
            |x| {
                if x[0] < 0.0 {
                    Err(FitError::InvalidInput("negative".into()))
                } else {
                    Ok((x[0] - 0.5).powi(2))
                }
            },
            &[2.0],
            0.5,
            &settings(),
        )
        .unwrap();
        assert!((opt.x[0] - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_nelder_mead_rejects_empty_start() {
        assert!(nelder_mead(|_| Ok(0.0), &[], 0.1, &settings()).is_err());
    }
}
