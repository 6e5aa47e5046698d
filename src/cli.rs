use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Command line options for the aerosol figure jobs.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Histograms, ensemble statistics and figures from particle-resolved aerosol snapshots"
)]
pub struct CliOptions {
    /// Log debug details (RUST_LOG takes precedence when set).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Number and mass distributions across ensemble members.
    #[command(name = "ensemble-1d")]
    Ensemble1d(JobArgs),
    /// Two-quantity distribution across ensemble members.
    #[command(name = "ensemble-2d")]
    Ensemble2d(JobArgs),
    /// Critical supersaturation distribution over time.
    ScritTime(JobArgs),
    /// Mean particle age on a 2D grid for one snapshot.
    AgeMap(JobArgs),
    /// Activated fractions over a range of supersaturations.
    CcnSpectrum(JobArgs),
    /// Bulk number and mass concentrations over time.
    Bulk(JobArgs),
    /// Per-particle aging times to critical supersaturation levels.
    Aging(JobArgs),
    /// Wet diameter of selected particles over time.
    Track(JobArgs),
    /// Distribution of one quantity over time.
    DistTime(JobArgs),
}

#[derive(Args, Debug, Clone)]
pub struct JobArgs {
    /// Path to the job's TOML configuration file (default: config/<job>.toml).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Display configuration summary without running the job.
    #[arg(long)]
    pub dry_run: bool,
}

impl Command {
    pub fn args(&self) -> &JobArgs {
        match self {
            Command::Ensemble1d(args)
            | Command::Ensemble2d(args)
            | Command::ScritTime(args)
            | Command::AgeMap(args)
            | Command::CcnSpectrum(args)
            | Command::Bulk(args)
            | Command::Aging(args)
            | Command::Track(args)
            | Command::DistTime(args) => args,
        }
    }

    fn config_stem(&self) -> &'static str {
        match self {
            Command::Ensemble1d(_) => "ensemble_1d",
            Command::Ensemble2d(_) => "ensemble_2d",
            Command::ScritTime(_) => "scrit_time",
            Command::AgeMap(_) => "age_map",
            Command::CcnSpectrum(_) => "ccn_spectrum",
            Command::Bulk(_) => "bulk",
            Command::Aging(_) => "aging",
            Command::Track(_) => "track",
            Command::DistTime(_) => "dist_time",
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.args()
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("config/{}.toml", self.config_stem())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_follows_job_name() {
        let cli = CliOptions::parse_from(["aero-figures", "scrit-time", "--dry-run"]);
        assert!(cli.command.args().dry_run);
        assert_eq!(cli.command.config_path(), PathBuf::from("config/scrit_time.toml"));
    }

    #[test]
    fn explicit_config_and_global_verbose() {
        let cli = CliOptions::parse_from([
            "aero-figures",
            "ensemble-2d",
            "--config",
            "runs/a.toml",
            "-v",
        ]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Ensemble2d(_)));
        assert_eq!(cli.command.config_path(), PathBuf::from("runs/a.toml"));
    }
}
