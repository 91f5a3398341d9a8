use anyhow::{Context, Result};
use clap::Parser;
use narps_stats::cli::{Cli, OutputFormat};
use narps_stats::config::AnalysisConfig;
use narps_stats::json_output::JsonOutput;
use narps_stats::pipeline::{self, Outcome};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn print_outcomes(format: OutputFormat, command: &str, outcomes: &[Outcome]) -> Result<()> {
    match format {
        OutputFormat::Text => {
            for outcome in outcomes {
                println!("{}", outcome.to_report_string());
            }
        }
        OutputFormat::Json => {
            println!("{}", JsonOutput::new(command, &outcomes).to_json()?);
        }
        OutputFormat::Csv => {
            for table in outcomes.iter().flat_map(Outcome::tables) {
                println!("# {}", table.name);
                print!("{}", table.to_csv());
                println!();
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let config = AnalysisConfig::resolve(args.config.as_deref(), args.basedir.clone())?;
    tracing::info!(
        command = args.command.name(),
        basedir = %config.basedir.display(),
        "starting"
    );

    let outcomes = pipeline::execute(&args.command, &config)
        .with_context(|| format!("narps {} failed", args.command.name()))?;
    let output_dir = config.output_dir();
    let written = pipeline::write_outputs(&outcomes, &output_dir)?;
    for path in &written {
        tracing::debug!(path = %path.display(), "wrote");
    }

    print_outcomes(args.format, args.command.name(), &outcomes)
}
