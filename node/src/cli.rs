//! # CLI Interface
//!
//! Command-line structure for `velock-node`, via `clap` derive. Four
//! subcommands: `run`, `init`, `simulate` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// velock keeper node.
///
/// Hosts the vote-escrow accounting engine, keeps its checkpoints current,
/// and serves read queries and Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "velock-node",
    about = "velock vote-escrow accounting node",
    version,
    propagate_version = true
)]
pub struct VelockNodeCli {
    /// Log output format: "pretty" or "json".
    #[arg(long, global = true, env = "VELOCK_LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node: API, metrics and keeper.
    Run(RunArgs),
    /// Write a default `config.toml` into a data directory.
    Init(InitArgs),
    /// Run an offline scenario and print a JSON report.
    Simulate(SimulateArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand. Flags override the config file.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory.
    #[arg(long, short = 'c', env = "VELOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the config file and the engine snapshot.
    #[arg(long, short = 'd', env = "VELOCK_DATA_DIR", default_value = ".velock")]
    pub data_dir: PathBuf,

    /// Port for the query API.
    #[arg(long, env = "VELOCK_API_PORT")]
    pub api_port: Option<u16>,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "VELOCK_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Seconds between keeper wake-ups.
    #[arg(long, env = "VELOCK_KEEPER_INTERVAL")]
    pub keeper_interval: Option<u64>,

    /// Seconds between snapshot writes.
    #[arg(long, env = "VELOCK_SNAPSHOT_INTERVAL")]
    pub snapshot_interval: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to initialize.
    #[arg(long, short = 'd', env = "VELOCK_DATA_DIR", default_value = ".velock")]
    pub data_dir: PathBuf,

    /// Overwrite an existing `config.toml`.
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Number of lockers.
    #[arg(long, default_value_t = 4)]
    pub users: u64,

    /// Number of reward channels sharing the emission.
    #[arg(long, default_value_t = 2)]
    pub channels: u64,

    /// Weeks to simulate.
    #[arg(long, default_value_t = 104)]
    pub weeks: u64,

    /// Fee tokens deposited each week, in whole tokens.
    #[arg(long, default_value_t = 1_000)]
    pub weekly_fees: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli_structure() {
        VelockNodeCli::command().debug_assert();
    }

    #[test]
    fn run_flags_are_optional_overrides() {
        let cli = VelockNodeCli::parse_from(["velock-node", "run", "--api-port", "7000"]);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.api_port, Some(7000));
                assert_eq!(args.metrics_port, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
