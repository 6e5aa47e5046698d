mod cli;

use std::path::Path;
use std::time::Instant;

use aero_figures::config;
use aero_figures::jobs::{self, JobReport};
use anyhow::{Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{CliOptions, Command};

fn main() -> Result<()> {
    let cli = CliOptions::parse();
    init_tracing(cli.verbose);

    let config_path = cli.command.config_path();
    if !config_path.exists() {
        return Err(anyhow!(
            "configuration file {} does not exist",
            config_path.display()
        ));
    }
    let dry_run = cli.command.args().dry_run;

    match &cli.command {
        Command::Ensemble1d(_) => execute(
            &config_path,
            dry_run,
            |path| config::load_ensemble_1d_from_file(path),
            config::Ensemble1dSettings::summary_lines,
            jobs::ensemble_1d::run,
        ),
        Command::Ensemble2d(_) => execute(
            &config_path,
            dry_run,
            |path| config::load_ensemble_2d_from_file(path),
            config::Ensemble2dSettings::summary_lines,
            jobs::ensemble_2d::run,
        ),
        Command::ScritTime(_) => execute(
            &config_path,
            dry_run,
            |path| config::load_scrit_time_from_file(path),
            config::ScritTimeSettings::summary_lines,
            jobs::scrit_time::run,
        ),
        Command::AgeMap(_) => execute(
            &config_path,
            dry_run,
            |path| config::load_age_map_from_file(path),
            config::AgeMapSettings::summary_lines,
            jobs::age_map::run,
        ),
        Command::CcnSpectrum(_) => execute(
            &config_path,
            dry_run,
            |path| config::load_ccn_from_file(path),
            config::CcnSettings::summary_lines,
            jobs::ccn::run,
        ),
        Command::Bulk(_) => execute(
            &config_path,
            dry_run,
            |path| config::load_bulk_from_file(path),
            config::BulkSettings::summary_lines,
            jobs::bulk::run,
        ),
        Command::Aging(_) => execute(
            &config_path,
            dry_run,
            |path| config::load_aging_from_file(path),
            config::AgingSettings::summary_lines,
            jobs::aging::run,
        ),
        Command::Track(_) => execute(
            &config_path,
            dry_run,
            |path| config::load_track_from_file(path),
            config::TrackSettings::summary_lines,
            jobs::track::run,
        ),
        Command::DistTime(_) => execute(
            &config_path,
            dry_run,
            |path| config::load_dist_time_from_file(path),
            config::DistTimeSettings::summary_lines,
            jobs::dist_time::run,
        ),
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute<S>(
    config_path: &Path,
    dry_run: bool,
    load: impl Fn(&Path) -> Result<S>,
    summary_lines: impl Fn(&S) -> Vec<String>,
    run: impl Fn(&S) -> Result<JobReport>,
) -> Result<()> {
    let settings = load(config_path)?;

    println!("Configuration summary:");
    for line in summary_lines(&settings) {
        println!("  - {line}");
    }

    if dry_run {
        println!("Dry-run requested; exiting without running the job.");
        return Ok(());
    }

    let start = Instant::now();
    let report = run(&settings)?;

    println!(
        "Job {} finished in {:.3?}; wrote {} files.",
        report.job,
        start.elapsed(),
        report.outputs.len()
    );
    for line in &report.summary {
        println!("  - {line}");
    }
    for file in &report.outputs {
        println!("  -> {}", file.display());
    }
    Ok(())
}
