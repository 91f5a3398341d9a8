//! CLI argument parsing for narps

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for analysis results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text report (default)
    Text,
    /// JSON format for machine parsing
    Json,
    /// CSV tables for spreadsheet analysis
    Csv,
}

#[derive(Parser, Debug)]
#[command(name = "narps")]
#[command(version)]
#[command(
    about = "Exploratory statistics for the NARPS analytic-variability study",
    long_about = None
)]
pub struct Cli {
    /// Base directory holding metadata/, consensus/ and output/ (overrides NARPS_BASEDIR)
    #[arg(long, value_name = "DIR", global = true)]
    pub basedir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Output format printed to stdout
    #[arg(long = "format", value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Enable debug tracing to stderr
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Mixed-effects models of hypothesis decisions
    Decisions,

    /// Least-squares model of mean pattern distance
    Distances {
        /// Hypothesis whose metadata rows are joined to the distances
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u8).range(1..=9))]
        hypothesis: Option<u8>,
    },

    /// Monte Carlo comparison of the two gamble designs
    Simulate {
        /// Replicates per lambda
        #[arg(long, value_name = "N")]
        replicates: Option<usize>,

        /// Standard deviation of the response noise
        #[arg(long, value_name = "SIGMA")]
        noise: Option<f64>,

        /// RNG seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Correlated one-sample tests on team result maps
    Consensus {
        /// Hypotheses to analyse (repeatable, default all nine)
        #[arg(long = "hypothesis", value_name = "N", value_parser = clap::value_parser!(u8).range(1..=9))]
        hypotheses: Vec<u8>,
    },

    /// Run every pipeline with defaults
    All,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Decisions => "decisions",
            Command::Distances { .. } => "distances",
            Command::Simulate { .. } => "simulate",
            Command::Consensus { .. } => "consensus",
            Command::All => "all",
        }
    }
}
