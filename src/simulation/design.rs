// Gamble designs for the loss-aversion task
//
// Each design crosses a 16-point gain grid with a 16-point loss grid, giving
// 256 mixed gambles. Trials are ordered gain-major (all losses for the first
// gain, then the next gain).

use serde::Serialize;
use std::fmt;

pub const GRID_POINTS: usize = 16;
pub const TRIALS: usize = GRID_POINTS * GRID_POINTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DesignKind {
    /// Gains 10..=40 step 2, losses 5..=20 (the NARPS task)
    Indifference,
    /// Gains and losses both 5..=20
    Equal,
}

impl DesignKind {
    pub const ALL: [DesignKind; 2] = [DesignKind::Indifference, DesignKind::Equal];

    pub fn name(&self) -> &'static str {
        match self {
            DesignKind::Indifference => "indifference",
            DesignKind::Equal => "equal",
        }
    }

    pub fn gains(&self) -> Vec<f64> {
        match self {
            DesignKind::Indifference => (0..GRID_POINTS).map(|i| 10.0 + 2.0 * i as f64).collect(),
            DesignKind::Equal => (0..GRID_POINTS).map(|i| 5.0 + i as f64).collect(),
        }
    }

    pub fn losses(&self) -> Vec<f64> {
        (0..GRID_POINTS).map(|i| 5.0 + i as f64).collect()
    }
}

impl fmt::Display for DesignKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cross product of a design's gain and loss grids
#[derive(Debug, Clone, PartialEq)]
pub struct GambleDesign {
    pub kind: DesignKind,
    pub gains: Vec<f64>,
    pub losses: Vec<f64>,
}

impl GambleDesign {
    pub fn new(kind: DesignKind) -> Self {
        Self::from_grids(kind, &kind.gains(), &kind.losses())
    }

    /// Cross arbitrary grids (gain-major order)
    pub fn from_grids(kind: DesignKind, gain_grid: &[f64], loss_grid: &[f64]) -> Self {
        let mut gains = Vec::with_capacity(gain_grid.len() * loss_grid.len());
        let mut losses = Vec::with_capacity(gains.capacity());
        for &gain in gain_grid {
            for &loss in loss_grid {
                gains.push(gain);
                losses.push(loss);
            }
        }
        Self {
            kind,
            gains,
            losses,
        }
    }

    pub fn n_trials(&self) -> usize {
        self.gains.len()
    }

    /// Noise-free response `gain - lambda * loss` plus the given noise
    pub fn response(&self, lambda: f64, noise: &[f64]) -> Vec<f64> {
        self.gains
            .iter()
            .zip(&self.losses)
            .zip(noise.iter().chain(std::iter::repeat(&0.0)))
            .map(|((gain, loss), e)| gain - lambda * loss + e)
            .collect()
    }
}
