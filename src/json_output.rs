//! JSON output format (`--format json`)
//!
//! Results are wrapped in an envelope naming the command that produced them.

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct JsonOutput<'a, T: Serialize> {
    pub version: &'static str,
    pub command: &'a str,
    pub results: &'a T,
}

impl<'a, T: Serialize> JsonOutput<'a, T> {
    pub fn new(command: &'a str, results: &'a T) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            command,
            results,
        }
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize results to JSON")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        covariate: &'static str,
        p_value: f64,
    }

    #[test]
    fn test_json_envelope() {
        let results = vec![Sample {
            covariate: "smoothness",
            p_value: 0.01,
        }];
        let json = JsonOutput::new("decisions", &results).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["command"], "decisions");
        assert_eq!(value["results"][0]["covariate"], "smoothness");
        assert_eq!(value["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_nan_serializes_as_null() {
        let results = Sample {
            covariate: "testing",
            p_value: f64::NAN,
        };
        let json = JsonOutput::new("distances", &results).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["results"]["p_value"].is_null());
    }
}
