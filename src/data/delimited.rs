// Minimal delimited-text reader
//
// The delimiter (tab or comma) is detected from the header line. Fields may
// be double-quoted; a doubled quote inside a quoted field is a literal quote.
// Blank lines are skipped. Line numbers are 1-based and count the header.

use super::{DataError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct DelimitedTable {
    pub headers: Vec<String>,
    /// (source line number, fields) for every data row
    pub rows: Vec<(usize, Vec<String>)>,
}

impl DelimitedTable {
    /// Parse a table whose first non-blank line is the header
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line.trim_end_matches('\r')))
            .filter(|(_, line)| !line.trim().is_empty());

        let Some((_, header_line)) = lines.next() else {
            return Ok(Self {
                headers: Vec::new(),
                rows: Vec::new(),
            });
        };
        let delimiter = if header_line.contains('\t') { '\t' } else { ',' };
        let headers = split_fields(header_line, delimiter)
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();
        let rows = lines
            .map(|(number, line)| (number, split_fields(line, delimiter)))
            .collect();

        Ok(Self { headers, rows })
    }

    /// Parse a header-less numeric matrix (one row per line)
    pub fn parse_matrix(text: &str) -> Result<Vec<Vec<f64>>> {
        let mut matrix = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let delimiter = if line.contains('\t') { '\t' } else { ',' };
            let row = split_fields(line, delimiter)
                .into_iter()
                .enumerate()
                .map(|(j, field)| {
                    field.trim().parse::<f64>().map_err(|_| DataError::Parse {
                        line: i + 1,
                        column: format!("column {}", j + 1),
                        value: field.clone(),
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            matrix.push(row);
        }
        Ok(matrix)
    }

    /// Index of a required column
    pub fn column(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| DataError::MissingColumn(name.to_string()))
    }

    /// Field of a row, empty when the row is short
    pub fn field<'a>(fields: &'a [String], index: usize) -> &'a str {
        fields.get(index).map(String::as_str).unwrap_or("")
    }
}

fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.is_empty() => in_quotes = true,
            c if c == delimiter && !in_quotes => {
                fields.push(std::mem::take(&mut current));
            }
            c => current.push(c),
        }
    }
    fields.push(current);
    fields
}
