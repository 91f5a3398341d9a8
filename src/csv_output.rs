//! CSV output for effect tables
//!
//! Every pipeline renders its results as one or more tables; the same table
//! is written to `<output>/<name>.csv` and printed with `--format csv`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Header plus string rows
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    /// File stem, e.g. `decision_effects`
    pub name: String,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn new(name: &str, headers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Add a row; short rows are padded with empty fields
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.headers.len(), String::new());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Escape CSV field (handle commas, quotes, newlines)
    fn escape_field(field: &str) -> String {
        if field.contains(',') || field.contains('"') || field.contains('\n') {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    fn format_row(fields: &[String]) -> String {
        fields
            .iter()
            .map(|f| Self::escape_field(f))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Generate CSV output as string
    pub fn to_csv(&self) -> String {
        let mut output = String::new();

        output.push_str(&Self::format_row(&self.headers));
        output.push('\n');

        for row in &self.rows {
            output.push_str(&Self::format_row(row));
            output.push('\n');
        }

        output
    }

    /// Write `<dir>/<name>.csv`, returning the path written
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("{}.csv", self.name));
        std::fs::write(&path, self.to_csv())
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::debug!(path = %path.display(), rows = self.len(), "table written");
        Ok(path)
    }
}

/// Float cell: full precision, `NA` for non-finite values
pub fn float(value: f64) -> String {
    if value.is_finite() {
        format!("{}", value)
    } else {
        "NA".to_string()
    }
}

/// Optional float cell
pub fn opt_float(value: Option<f64>) -> String {
    value.map(float).unwrap_or_else(|| "NA".to_string())
}

/// Write a plain-text report next to the tables
pub fn write_report(dir: &Path, name: &str, text: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{}_report.txt", name));
    std::fs::write(&path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
