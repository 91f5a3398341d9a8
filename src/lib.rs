//! NARPS statistics - exploratory models of analytic variability
//!
//! This library provides the statistical pipelines used to study how analytic
//! choices relate to team outcomes in the NARPS neuroimaging study:
//! mixed-effects models of hypothesis decisions, a least-squares model of
//! result-pattern distance, a Monte Carlo comparison of gamble designs and a
//! correlated consensus analysis of team result maps.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod consensus;
pub mod csv_output;
pub mod data;
pub mod json_output;
pub mod model;
pub mod pipeline;
pub mod simulation;
pub mod stats;
