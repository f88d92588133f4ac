//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// fea-stream - Session-controlled streaming of per-timestep solver frames
#[derive(Parser, Debug)]
#[command(
    name = "fea-stream",
    author,
    version,
    about = "Finite-element frame streaming session controller",
    long_about = "A bounded-latency streaming front end for per-timestep solver output.\n\n\
                  Loads a stream blueprint, binds the synthetic cam-follower solver, \n\
                  fans frames out to the configured subscribers, and records capture \n\
                  artifacts that replay deterministically."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FEA_STREAM_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "FEA_STREAM_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a streaming session from a blueprint
    Run(RunArgs),

    /// Replay a recorded capture artifact
    Replay(ReplayArgs),

    /// Validate a blueprint file without running
    Validate(ValidateArgs),

    /// Display blueprint information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to blueprint file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "stream.toml",
        env = "FEA_STREAM_CONFIG"
    )]
    pub config: PathBuf,

    /// Override target step rate (Hz) from configuration
    #[arg(long, env = "FEA_STREAM_RATE")]
    pub rate: Option<f64>,

    /// Record the run into this directory
    #[arg(long, env = "FEA_STREAM_CAPTURE")]
    pub capture: Option<PathBuf>,

    /// Maximum number of frames to produce (0 = unlimited)
    #[arg(long, default_value = "0", env = "FEA_STREAM_MAX_FRAMES")]
    pub max_frames: u64,

    /// Session timeout in seconds (0 = no timeout)
    #[arg(long, default_value = "0", env = "FEA_STREAM_TIMEOUT")]
    pub timeout: u64,

    /// Validate the blueprint and exit without running
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port, overriding configuration (0 = disabled)
    #[arg(long, env = "FEA_STREAM_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

/// Arguments for the `replay` command
#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Path to the capture artifact directory
    #[arg(short, long, env = "FEA_STREAM_ARTIFACT")]
    pub artifact: PathBuf,

    /// Recompute and check every frame hash before streaming
    #[arg(long)]
    pub verify: bool,

    /// Maximum number of frames to replay (0 = all)
    #[arg(long, default_value = "0")]
    pub max_frames: u64,

    /// Output the replay report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to blueprint file to validate
    #[arg(short, long, default_value = "stream.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to blueprint file
    #[arg(short, long, default_value = "stream.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show per-subscription channel detail
    #[arg(long)]
    pub subscriptions: bool,

    /// Show solver profile and mesh detail
    #[arg(long)]
    pub solver: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["fea-stream", "run"]).unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.config, PathBuf::from("stream.toml"));
                assert_eq!(args.max_frames, 0);
                assert_eq!(args.timeout, 0);
                assert!(args.rate.is_none());
                assert!(!args.dry_run);
            }
            other => panic!("expected run command, got {other:?}"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["fea-stream", "-q", "-v", "run"]);
        assert!(result.is_err());
    }
}
