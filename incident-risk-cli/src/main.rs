//! Incident Risk CLI Application
//!
//! Command-line front end for the incident-risk-core library:
//! - `build` turns per-session record dumps into a labeled feature matrix
//! - `evaluate` scores externally produced probabilities against that matrix

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use incident_risk_core::FeaturePipeline;
use std::fs;
use std::path::{Path, PathBuf};

mod batch;
mod config;
mod input;
mod output;
mod report;

use config::{AppConfig, OutputFormat};

/// Incident Risk - Build leakage-safe incident forecasting datasets
#[derive(Parser, Debug)]
#[command(name = "incident-risk")]
#[command(about = "Build and evaluate incident risk feature matrices", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the labeled feature matrix from record dumps
    Build(BuildArgs),
    /// Evaluate predicted probabilities against a built matrix
    Evaluate(EvaluateArgs),
}

#[derive(ClapArgs, Debug)]
struct BuildArgs {
    /// Sessions dump (JSON array)
    #[arg(long, value_name = "FILE")]
    sessions: Option<PathBuf>,

    /// Race control messages dump
    #[arg(long, value_name = "FILE")]
    race_control: Option<PathBuf>,

    /// Weather dump
    #[arg(long, value_name = "FILE")]
    weather: Option<PathBuf>,

    /// Position dump
    #[arg(long, value_name = "FILE")]
    position: Option<PathBuf>,

    /// Intervals dump
    #[arg(long, value_name = "FILE")]
    intervals: Option<PathBuf>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Grid interval in seconds
    #[arg(long, value_name = "SECONDS")]
    interval: Option<i64>,

    /// Prediction horizon in seconds
    #[arg(long, value_name = "SECONDS")]
    horizon: Option<i64>,
}

#[derive(ClapArgs, Debug)]
struct EvaluateArgs {
    /// Feature matrix written by `build`
    #[arg(long, value_name = "FILE")]
    matrix: PathBuf,

    /// CSV with session_key, timestamp and probability columns
    #[arg(long, value_name = "FILE")]
    predictions: PathBuf,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Alert threshold (can be repeated, replaces the configured list)
    #[arg(long = "threshold", value_name = "P")]
    thresholds: Vec<f64>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Incident Risk CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using core library v{}", incident_risk_core::VERSION);

    let config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };

    match args.command {
        Command::Build(build) => build_mode(config, build),
        Command::Evaluate(evaluate) => evaluate_mode(config, evaluate),
    }
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory: {:?}", dir))
}

/// Build mode - load dumps, run every session, write the matrix and summary
fn build_mode(mut config: AppConfig, args: BuildArgs) -> Result<()> {
    let inputs = &mut config.input;
    inputs.sessions = args.sessions.or(inputs.sessions.take());
    inputs.race_control = args.race_control.or(inputs.race_control.take());
    inputs.weather = args.weather.or(inputs.weather.take());
    inputs.position = args.position.or(inputs.position.take());
    inputs.intervals = args.intervals.or(inputs.intervals.take());
    if let Some(dir) = args.output {
        config.output.dir = dir;
    }
    if let Some(seconds) = args.interval {
        config.engine.grid_interval_seconds = seconds;
    }
    if let Some(seconds) = args.horizon {
        config.engine.prediction_horizon_seconds = seconds;
    }

    let Some(sessions_path) = config.input.sessions.as_deref() else {
        bail!("No sessions input given (use --sessions or [input] sessions in the config)");
    };

    let vocabulary = config.vocabulary.build()?;
    let pipeline = FeaturePipeline::new(config.engine.clone(), vocabulary)
        .context("Invalid engine configuration")?;

    let data = input::load_inputs(
        sessions_path,
        config.input.race_control.as_deref(),
        config.input.weather.as_deref(),
        config.input.position.as_deref(),
        config.input.intervals.as_deref(),
    )?;

    let outcome = batch::run_batch(&pipeline, &data)?;
    for (key, reason) in &outcome.skipped {
        log::warn!("Skipped session {}: {}", key, reason);
    }

    let dir = &config.output.dir;
    prepare_output_dir(dir)?;
    let summary = report::BuildSummary::from_outcome(&outcome);

    for format in &config.output.formats {
        match format {
            OutputFormat::Csv => {
                output::write_matrix_file(&dir.join("matrix.csv"), &outcome.frames)?;
            }
            OutputFormat::Json => report::write_json(&dir.join("build_summary.json"), &summary)?,
            OutputFormat::Markdown => {
                report::write_markdown(&dir.join("build_summary.md"), &summary.to_markdown())?
            }
        }
    }

    println!(
        "Built {} row(s) from {} session(s), {} skipped, positive rate {:.2}%",
        summary.total_rows,
        summary.sessions.len(),
        summary.skipped.len(),
        summary.positive_rate * 100.0
    );
    Ok(())
}

/// Evaluate mode - join predictions onto the matrix and write the report
fn evaluate_mode(mut config: AppConfig, args: EvaluateArgs) -> Result<()> {
    if !args.thresholds.is_empty() {
        config.engine.alert_thresholds = args.thresholds;
        config.engine.validate().context("Invalid --threshold")?;
    }
    if let Some(dir) = args.output {
        config.output.dir = dir;
    }

    let points = output::join_prediction_files(&args.matrix, &args.predictions)?;
    if points.is_empty() {
        bail!("No prediction matched a labeled matrix row");
    }
    log::info!("Evaluating {} scored point(s)", points.len());

    let evaluation = report::EvaluationReport::build(
        &points,
        &config.engine.alert_thresholds,
        config.output.calibration_bins,
    )?;

    let dir = &config.output.dir;
    prepare_output_dir(dir)?;
    let markdown = evaluation.to_markdown();
    for format in &config.output.formats {
        match format {
            OutputFormat::Json => report::write_json(&dir.join("evaluation.json"), &evaluation)?,
            OutputFormat::Markdown => report::write_markdown(&dir.join("evaluation.md"), &markdown)?,
            OutputFormat::Csv => log::debug!("CSV output does not apply to evaluate"),
        }
    }

    println!("{}", markdown);
    Ok(())
}

/// Environment variable that overrides the `-v`/`-q` level, in `RUST_LOG` syntax
const LOG_ENV: &str = "INCIDENT_RISK_LOG";

fn log_level(verbose: u8, quiet: bool) -> log::LevelFilter {
    use log::LevelFilter;

    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

/// Initialize logging: `[LEVEL target] message` on stderr.
///
/// Per-session progress is logged from rayon workers, so the target names the
/// emitting module.
fn init_logging(verbose: u8, quiet: bool) {
    use std::io::Write;

    env_logger::Builder::new()
        .filter_level(log_level(verbose, quiet))
        .parse_env(env_logger::Env::new().filter(LOG_ENV))
        .format(|buf, record| {
            writeln!(buf, "[{} {}] {}", record.level(), record.target(), record.args())
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use log::LevelFilter;

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0, false), LevelFilter::Info);
        assert_eq!(log_level(1, false), LevelFilter::Debug);
        assert_eq!(log_level(3, false), LevelFilter::Trace);
        assert_eq!(log_level(2, true), LevelFilter::Error);
    }

    #[test]
    fn test_args_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "incident-risk",
            "build",
            "--sessions",
            "s.json",
            "-vv",
            "--horizon",
            "600",
        ])
        .unwrap();
        assert_eq!(args.verbose, 2);
        let Command::Build(build) = args.command else {
            panic!("expected build");
        };
        assert_eq!(build.horizon, Some(600));
    }
}
