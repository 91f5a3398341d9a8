//! Input tables for the NARPS analyses
//!
//! - [`metadata`]: per-team, per-hypothesis analytic choices and decisions
//! - [`distance`]: mean result-pattern distance per team
//! - [`delimited`]: the comma/tab separated reader both are built on
//!
//! Recoding (package names, boolean spellings, missing markers) happens once
//! at load; downstream code only sees typed records.

pub mod delimited;
pub mod distance;
pub mod metadata;

pub use delimited::DelimitedTable;
pub use distance::DistanceRecord;
pub use metadata::{drop_incomplete, Package, TeamRecord};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while reading input tables
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing required column '{0}'")]
    MissingColumn(String),

    #[error("Line {line}: cannot parse {column} value '{value}'")]
    Parse {
        line: usize,
        column: String,
        value: String,
    },

    #[error("Line {line}: {column} value {value} is out of range ({expected})")]
    OutOfDomain {
        line: usize,
        column: String,
        value: String,
        expected: &'static str,
    },
}

pub type Result<T> = std::result::Result<T, DataError>;

/// Markers treated as a missing value in every column
pub(crate) fn is_missing(field: &str) -> bool {
    let field = field.trim();
    field.is_empty()
        || field.eq_ignore_ascii_case("na")
        || field.eq_ignore_ascii_case("nan")
        || field.eq_ignore_ascii_case("null")
}

pub(crate) fn read_file(path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| DataError::Io {
        path: path.to_path_buf(),
        source,
    })
}
