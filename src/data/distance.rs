//! Mean result-pattern distance per team (`mean_pattern_distance.csv`)

use super::metadata::TEAM_COLUMN;
use super::{is_missing, read_file, DataError, DelimitedTable, Result};
use crate::stats::fisher_z;
use serde::Serialize;
use std::path::Path;

pub const DISTANCE_COLUMN: &str = "mean_distance";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceRecord {
    pub team: String,
    /// Distance as read (correlation scale), NaN when missing
    pub raw: f64,
    /// Fisher-Z transformed distance; missing values map to 0
    pub fisher_z: f64,
}

impl DistanceRecord {
    pub fn load(path: &Path) -> Result<Vec<DistanceRecord>> {
        let records = Self::parse_str(&read_file(path)?)?;
        tracing::debug!(path = %path.display(), rows = records.len(), "pattern distances loaded");
        Ok(records)
    }

    pub fn parse_str(text: &str) -> Result<Vec<DistanceRecord>> {
        let table = DelimitedTable::parse(text)?;
        let team = table.column(TEAM_COLUMN)?;
        let distance = table.column(DISTANCE_COLUMN)?;

        table
            .rows
            .iter()
            .map(|(line, fields)| {
                let value = DelimitedTable::field(fields, distance);
                let raw = if is_missing(value) {
                    f64::NAN
                } else {
                    value.trim().parse::<f64>().map_err(|_| DataError::Parse {
                        line: *line,
                        column: DISTANCE_COLUMN.to_string(),
                        value: value.to_string(),
                    })?
                };
                if raw.abs() >= 1.0 {
                    return Err(DataError::OutOfDomain {
                        line: *line,
                        column: DISTANCE_COLUMN.to_string(),
                        value: value.to_string(),
                        expected: "|r| < 1",
                    });
                }
                Ok(DistanceRecord {
                    team: DelimitedTable::field(fields, team).trim().to_string(),
                    raw,
                    fisher_z: fisher_z(raw),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fisher_z_applied_at_load() {
        let records = DistanceRecord::parse_str("teamID,mean_distance\nA,0.5\nB,0\nC,NA\n").unwrap();
        assert_eq!(records.len(), 3);
        assert!((records[0].fisher_z - 0.5f64.atanh()).abs() < 1e-12);
        assert_eq!(records[1].fisher_z, 0.0);
        assert!(records[2].raw.is_nan());
        assert_eq!(records[2].fisher_z, 0.0);
    }

    #[test]
    fn test_out_of_domain_distance() {
        let err = DistanceRecord::parse_str("teamID,mean_distance\nA,1.0\n").unwrap_err();
        assert!(matches!(err, DataError::OutOfDomain { line: 2, .. }));
    }

    #[test]
    fn test_unparseable_distance() {
        let err = DistanceRecord::parse_str("teamID,mean_distance\nA,far\n").unwrap_err();
        assert!(matches!(err, DataError::Parse { .. }));
    }

    #[test]
    fn test_extra_columns_ignored() {
        let records =
            DistanceRecord::parse_str("idx\tteamID\tmean_distance\n0\tX1\t-0.25\n").unwrap();
        assert_eq!(records[0].team, "X1");
        assert!(records[0].fisher_z < 0.0);
    }
}
