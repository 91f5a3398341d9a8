// Model frames: fixed-effect design matrix, response and team grouping
//
// Factors use treatment contrasts with the alphabetically first level as
// reference, so every factor with k observed levels contributes k - 1
// columns. Levels are taken from the rows being modeled, which means a factor
// can lose levels (or all of its columns) in a subgroup.

use super::{FitError, Result};
use nalgebra::{DMatrix, DVector};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::Range;

/// Analytic choices used as model covariates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Covariate {
    /// Hypothesis-variable index (1..=9), modeled as a factor
    Hypothesis,
    /// Estimated smoothness of the team's result map (FWHM)
    Smoothness,
    /// Specified smoothing kernel size
    KernelSize,
    /// Whether the fMRIPrep preprocessed data were used
    Pipeline,
    /// Software package (SPM/FSL/AFNI/Other)
    Package,
    /// Multiple-testing correction method
    Testing,
}

/// How a covariate enters the design matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CovariateKind {
    Numeric,
    Factor,
}

impl Covariate {
    /// Covariates of the full mixed-effects decision model
    pub const DECISION: [Covariate; 5] = [
        Covariate::Hypothesis,
        Covariate::Smoothness,
        Covariate::Pipeline,
        Covariate::Package,
        Covariate::Testing,
    ];

    /// Covariates of the pattern-distance model (one hypothesis, so the
    /// kernel size replaces the hypothesis factor)
    pub const DISTANCE: [Covariate; 5] = [
        Covariate::Smoothness,
        Covariate::KernelSize,
        Covariate::Pipeline,
        Covariate::Package,
        Covariate::Testing,
    ];

    /// Covariates fitted one at a time against the random-intercept null
    pub const UNIVARIATE: [Covariate; 6] = [
        Covariate::Hypothesis,
        Covariate::Smoothness,
        Covariate::KernelSize,
        Covariate::Pipeline,
        Covariate::Package,
        Covariate::Testing,
    ];

    /// Covariates of the per-hypothesis subgroup models
    pub const SUBGROUP: [Covariate; 4] = [
        Covariate::Smoothness,
        Covariate::Pipeline,
        Covariate::Package,
        Covariate::Testing,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Covariate::Hypothesis => "hypothesis",
            Covariate::Smoothness => "smoothness",
            Covariate::KernelSize => "kernel_size",
            Covariate::Pipeline => "pipeline",
            Covariate::Package => "package",
            Covariate::Testing => "testing",
        }
    }

    pub fn kind(&self) -> CovariateKind {
        match self {
            Covariate::Smoothness | Covariate::KernelSize => CovariateKind::Numeric,
            Covariate::Hypothesis
            | Covariate::Pipeline
            | Covariate::Package
            | Covariate::Testing => CovariateKind::Factor,
        }
    }
}

impl fmt::Display for Covariate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of a covariate in one observation
#[derive(Debug, Clone, PartialEq)]
pub enum CovariateValue {
    Numeric(f64),
    Level(String),
}

/// Anything that can be turned into a model row
pub trait CovariateSource {
    /// Grouping key for the random intercept
    fn team(&self) -> &str;

    /// Covariate value, `None` when missing
    fn covariate(&self, covariate: Covariate) -> Option<CovariateValue>;

    fn is_complete(&self, covariates: &[Covariate]) -> bool {
        covariates.iter().all(|&c| self.covariate(c).is_some())
    }
}

/// Columns of the design matrix owned by one covariate
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub covariate: Covariate,
    pub columns: Range<usize>,
    /// All observed levels (reference first) for factors, empty for numerics
    pub levels: Vec<String>,
}

impl Term {
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// Design matrix, response and grouping for one model fit
#[derive(Debug, Clone)]
pub struct ModelFrame {
    pub x: DMatrix<f64>,
    pub y: DVector<f64>,
    /// Group index of each row
    pub groups: Vec<usize>,
    pub group_names: Vec<String>,
    pub column_names: Vec<String>,
    pub terms: Vec<Term>,
}

impl ModelFrame {
    /// Build a frame with an intercept plus one term per covariate
    ///
    /// All rows must be complete for `covariates`; drop incomplete rows first.
    pub fn build<T, F>(rows: &[T], covariates: &[Covariate], response: F) -> Result<Self>
    where
        T: CovariateSource,
        F: Fn(&T) -> f64,
    {
        if rows.is_empty() {
            return Err(FitError::EmptyFrame);
        }

        let mut column_names = vec!["(Intercept)".to_string()];
        let mut terms = Vec::with_capacity(covariates.len());
        let mut encoders: Vec<Encoder> = Vec::with_capacity(covariates.len());

        for &covariate in covariates {
            let start = column_names.len();
            let encoder = match covariate.kind() {
                CovariateKind::Numeric => {
                    column_names.push(covariate.name().to_string());
                    Encoder::Numeric
                }
                CovariateKind::Factor => {
                    let mut levels = BTreeSet::new();
                    for row in rows {
                        match row.covariate(covariate) {
                            Some(CovariateValue::Level(level)) => {
                                levels.insert(level);
                            }
                            Some(CovariateValue::Numeric(v)) => {
                                levels.insert(format_level(v));
                            }
                            None => return Err(missing(covariate, row.team())),
                        }
                    }
                    let levels: Vec<String> = levels.into_iter().collect();
                    for level in levels.iter().skip(1) {
                        column_names.push(format!("{}{}", covariate.name(), level));
                    }
                    Encoder::Factor(levels)
                }
            };
            let levels = match &encoder {
                Encoder::Factor(levels) => levels.clone(),
                Encoder::Numeric => Vec::new(),
            };
            terms.push(Term {
                covariate,
                columns: start..column_names.len(),
                levels,
            });
            encoders.push(encoder);
        }

        let n = rows.len();
        let p = column_names.len();
        let mut x = DMatrix::zeros(n, p);
        let mut y = DVector::zeros(n);
        // Groups are numbered alphabetically for deterministic output
        let group_names: Vec<String> = rows
            .iter()
            .map(|r| r.team().to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let group_lookup: BTreeMap<&str, usize> = group_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        let mut groups = Vec::with_capacity(n);
        for (i, row) in rows.iter().enumerate() {
            x[(i, 0)] = 1.0;
            for (term, encoder) in terms.iter().zip(&encoders) {
                let value = row
                    .covariate(term.covariate)
                    .ok_or_else(|| missing(term.covariate, row.team()))?;
                match (encoder, value) {
                    (Encoder::Numeric, CovariateValue::Numeric(v)) => {
                        if !v.is_finite() {
                            return Err(FitError::InvalidInput(format!(
                                "non-finite {} for team {}",
                                term.covariate,
                                row.team()
                            )));
                        }
                        x[(i, term.columns.start)] = v;
                    }
                    (Encoder::Factor(levels), value) => {
                        let level = match value {
                            CovariateValue::Level(level) => level,
                            CovariateValue::Numeric(v) => format_level(v),
                        };
                        if let Some(pos) = levels.iter().position(|l| *l == level) {
                            if pos > 0 {
                                x[(i, term.columns.start + pos - 1)] = 1.0;
                            }
                        }
                    }
                    (Encoder::Numeric, CovariateValue::Level(level)) => {
                        return Err(FitError::InvalidInput(format!(
                            "expected numeric {} but found level '{}'",
                            term.covariate, level
                        )));
                    }
                }
            }
            let value = response(row);
            if !value.is_finite() {
                return Err(FitError::InvalidInput(format!(
                    "non-finite response for team {}",
                    row.team()
                )));
            }
            y[i] = value;
            groups.push(group_lookup[row.team()]);
        }

        Ok(Self {
            x,
            y,
            groups,
            group_names,
            column_names,
            terms,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_groups(&self) -> usize {
        self.group_names.len()
    }

    pub fn term(&self, covariate: Covariate) -> Option<&Term> {
        self.terms.iter().find(|t| t.covariate == covariate)
    }

    /// Covariates in model order
    pub fn covariates(&self) -> Vec<Covariate> {
        self.terms.iter().map(|t| t.covariate).collect()
    }
}

enum Encoder {
    Numeric,
    Factor(Vec<String>),
}

fn format_level(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

fn missing(covariate: Covariate, team: &str) -> FitError {
    FitError::InvalidInput(format!(
        "missing {} for team {}; drop incomplete rows before modeling",
        covariate, team
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal in-memory observation used by the model tests
    #[derive(Debug, Clone)]
    pub(crate) struct Row {
        pub team: String,
        pub smoothness: Option<f64>,
        pub package: Option<String>,
        pub response: f64,
    }

    impl CovariateSource for Row {
        fn team(&self) -> &str {
            &self.team
        }

        fn covariate(&self, covariate: Covariate) -> Option<CovariateValue> {
            match covariate {
                Covariate::Smoothness => self.smoothness.map(CovariateValue::Numeric),
                Covariate::Package => self.package.clone().map(CovariateValue::Level),
                _ => None,
            }
        }
    }

    fn rows() -> Vec<Row> {
        vec![
            Row {
                team: "B".into(),
                smoothness: Some(8.0),
                package: Some("SPM".into()),
                response: 1.0,
            },
            Row {
                team: "A".into(),
                smoothness: Some(6.0),
                package: Some("FSL".into()),
                response: 0.0,
            },
            Row {
                team: "C".into(),
                smoothness: Some(9.5),
                package: Some("AFNI".into()),
                response: 1.0,
            },
        ]
    }

    #[test]
    fn test_build_treatment_coding() {
        let frame =
            ModelFrame::build(&rows(), &[Covariate::Smoothness, Covariate::Package], |r| {
                r.response
            })
            .unwrap();

        // Intercept, smoothness, packageFSL, packageSPM (AFNI is reference)
        assert_eq!(
            frame.column_names,
            vec!["(Intercept)", "smoothness", "packageFSL", "packageSPM"]
        );
        assert_eq!(frame.n_columns(), 4);
        assert_eq!(frame.x[(0, 1)], 8.0);
        assert_eq!(frame.x[(0, 3)], 1.0);
        assert_eq!(frame.x[(1, 2)], 1.0);
        assert_eq!(frame.x[(2, 2)], 0.0);
        assert_eq!(frame.x[(2, 3)], 0.0);

        let package = frame.term(Covariate::Package).unwrap();
        assert_eq!(package.width(), 2);
        assert_eq!(package.levels[0], "AFNI");
    }

    #[test]
    fn test_groups_alphabetical() {
        let frame = ModelFrame::build(&rows(), &[Covariate::Smoothness], |r| r.response).unwrap();
        assert_eq!(frame.group_names, vec!["A", "B", "C"]);
        assert_eq!(frame.groups, vec![1, 0, 2]);
    }

    #[test]
    fn test_intercept_only_frame() {
        let frame = ModelFrame::build(&rows(), &[], |r| r.response).unwrap();
        assert_eq!(frame.n_columns(), 1);
        assert!(frame.terms.is_empty());
    }

    #[test]
    fn test_missing_value_rejected() {
        let mut data = rows();
        data[1].package = None;
        let err = ModelFrame::build(&data, &[Covariate::Package], |r| r.response).unwrap_err();
        assert!(matches!(err, FitError::InvalidInput(_)));
    }

    #[test]
    fn test_empty_frame_rejected() {
        let data: Vec<Row> = Vec::new();
        assert_eq!(
            ModelFrame::build(&data, &[], |r| r.response).unwrap_err(),
            FitError::EmptyFrame
        );
    }

    #[test]
    fn test_single_level_factor_has_no_columns() {
        let mut data = rows();
        for row in &mut data {
            row.package = Some("SPM".into());
        }
        let frame = ModelFrame::build(&data, &[Covariate::Package], |r| r.response).unwrap();
        assert_eq!(frame.term(Covariate::Package).unwrap().width(), 0);
    }
}
