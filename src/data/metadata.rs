//! Team observation table (`all_metadata.csv`)
//!
//! One row per (team, hypothesis variable). Every covariate is optional at
//! this level; [`drop_incomplete`] removes rows that cannot be modeled.

use super::{is_missing, read_file, DataError, DelimitedTable, Result};
use crate::model::{Covariate, CovariateSource, CovariateValue};
use serde::Serialize;
use std::fmt;
use std::path::Path;

pub const TEAM_COLUMN: &str = "teamID";
pub const HYPOTHESIS_COLUMN: &str = "varnum";
pub const DECISION_COLUMN: &str = "Decision";
pub const SMOOTHNESS_COLUMN: &str = "fwhm";
pub const KERNEL_COLUMN: &str = "smoothing_coef";
pub const PACKAGE_COLUMN: &str = "package";
pub const PIPELINE_COLUMN: &str = "used_fmriprep_data";
pub const TESTING_COLUMN: &str = "testing";

/// Analysis software, with rare packages pooled into `Other`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Package {
    #[serde(rename = "AFNI")]
    Afni,
    #[serde(rename = "FSL")]
    Fsl,
    #[serde(rename = "SPM")]
    Spm,
    Other,
}

impl Package {
    /// Recode a raw package name; `None` for missing values
    pub fn recode(raw: &str) -> Option<Package> {
        if is_missing(raw) {
            return None;
        }
        let raw = raw.trim();
        Some(if raw.eq_ignore_ascii_case("spm") {
            Package::Spm
        } else if raw.eq_ignore_ascii_case("fsl") {
            Package::Fsl
        } else if raw.eq_ignore_ascii_case("afni") {
            Package::Afni
        } else {
            Package::Other
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Package::Afni => "AFNI",
            Package::Fsl => "FSL",
            Package::Spm => "SPM",
            Package::Other => "Other",
        }
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One team's analytic choices and decision for one hypothesis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeamRecord {
    pub team: String,
    /// Hypothesis-variable index, 1..=9
    pub hypothesis: u8,
    pub decision: Option<bool>,
    /// Estimated smoothness of the result map (FWHM, mm)
    pub smoothness: Option<f64>,
    /// Specified smoothing kernel (mm)
    pub kernel_size: Option<f64>,
    pub package: Option<Package>,
    /// Whether fMRIPrep preprocessed data were used
    pub pipeline: Option<bool>,
    /// Multiple-testing correction method
    pub testing: Option<String>,
}

impl TeamRecord {
    pub fn load(path: &Path) -> Result<Vec<TeamRecord>> {
        let records = Self::parse_str(&read_file(path)?)?;
        tracing::debug!(path = %path.display(), rows = records.len(), "metadata loaded");
        Ok(records)
    }

    pub fn parse_str(text: &str) -> Result<Vec<TeamRecord>> {
        let table = DelimitedTable::parse(text)?;
        let team = table.column(TEAM_COLUMN)?;
        let hypothesis = table.column(HYPOTHESIS_COLUMN)?;
        let decision = table.column(DECISION_COLUMN)?;
        let smoothness = table.column(SMOOTHNESS_COLUMN)?;
        let kernel = table.column(KERNEL_COLUMN)?;
        let package = table.column(PACKAGE_COLUMN)?;
        let pipeline = table.column(PIPELINE_COLUMN)?;
        let testing = table.column(TESTING_COLUMN)?;

        let mut records = Vec::with_capacity(table.rows.len());
        for (line, fields) in &table.rows {
            let field = |i| DelimitedTable::field(fields, i);
            let team_id = field(team).trim();
            if team_id.is_empty() {
                return Err(DataError::Parse {
                    line: *line,
                    column: TEAM_COLUMN.to_string(),
                    value: String::new(),
                });
            }
            let testing_value = field(testing);

            records.push(TeamRecord {
                team: team_id.to_string(),
                hypothesis: parse_hypothesis(*line, field(hypothesis))?,
                decision: parse_flag(field(decision)),
                smoothness: parse_numeric(*line, SMOOTHNESS_COLUMN, field(smoothness))?,
                kernel_size: parse_numeric(*line, KERNEL_COLUMN, field(kernel))?,
                package: Package::recode(field(package)),
                pipeline: parse_flag(field(pipeline)),
                testing: (!is_missing(testing_value)).then(|| testing_value.trim().to_string()),
            });
        }
        Ok(records)
    }

    /// Decision as a 0/1 response
    pub fn response(&self) -> f64 {
        match self.decision {
            Some(true) => 1.0,
            _ => 0.0,
        }
    }
}

impl CovariateSource for TeamRecord {
    fn team(&self) -> &str {
        &self.team
    }

    fn covariate(&self, covariate: Covariate) -> Option<CovariateValue> {
        match covariate {
            Covariate::Hypothesis => Some(CovariateValue::Level(self.hypothesis.to_string())),
            Covariate::Smoothness => self.smoothness.map(CovariateValue::Numeric),
            Covariate::KernelSize => self.kernel_size.map(CovariateValue::Numeric),
            Covariate::Pipeline => self
                .pipeline
                .map(|used| CovariateValue::Level(if used { "TRUE" } else { "FALSE" }.into())),
            Covariate::Package => self
                .package
                .map(|p| CovariateValue::Level(p.as_str().to_string())),
            Covariate::Testing => self.testing.clone().map(CovariateValue::Level),
        }
    }
}

/// Keep rows with a decision and every listed covariate
///
/// Returns the kept rows and the number dropped. Applying it twice drops
/// nothing the second time.
pub fn drop_incomplete(records: &[TeamRecord], covariates: &[Covariate]) -> (Vec<TeamRecord>, usize) {
    let kept: Vec<TeamRecord> = records
        .iter()
        .filter(|r| r.decision.is_some() && r.is_complete(covariates))
        .cloned()
        .collect();
    let dropped = records.len() - kept.len();
    if dropped > 0 {
        tracing::debug!(dropped, kept = kept.len(), "dropped rows with missing values");
    }
    (kept, dropped)
}

fn parse_hypothesis(line: usize, raw: &str) -> Result<u8> {
    let trimmed = raw.trim();
    let value = trimmed
        .parse::<u8>()
        .or_else(|_| {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && (0.0..=255.0).contains(v))
                .map(|v| v as u8)
                .ok_or(())
        })
        .map_err(|_| DataError::Parse {
            line,
            column: HYPOTHESIS_COLUMN.to_string(),
            value: raw.to_string(),
        })?;
    if !(1..=9).contains(&value) {
        return Err(DataError::OutOfDomain {
            line,
            column: HYPOTHESIS_COLUMN.to_string(),
            value: raw.to_string(),
            expected: "1..=9",
        });
    }
    Ok(value)
}

fn parse_numeric(line: usize, column: &str, raw: &str) -> Result<Option<f64>> {
    if is_missing(raw) {
        return Ok(None);
    }
    raw.trim()
        .parse::<f64>()
        .map(|v| v.is_finite().then_some(v))
        .map_err(|_| DataError::Parse {
            line,
            column: column.to_string(),
            value: raw.to_string(),
        })
}

/// Boolean spellings used across the metadata sheets
fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if ["yes", "true", "1"].iter().any(|s| raw.eq_ignore_ascii_case(s)) {
        Some(true)
    } else if ["no", "false", "0"].iter().any(|s| raw.eq_ignore_ascii_case(s)) {
        Some(false)
    } else {
        None
    }
}
