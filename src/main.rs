/*!
 * Fabric Agent CLI
 *
 * Each subcommand runs one long-lived loop:
 *
 *   fabric-agent health     resource liveness, reported to the controller
 *   fabric-agent discover   controller replica election
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use fabric_agent::{
    config::{AgentConfig, LogLevel, DEFAULT_CONFIG_PATH},
    daemon, logging,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fabric-agent")]
#[command(version, about = "Per-node liveness monitoring and controller failover", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        global = true
    )]
    config: PathBuf,

    /// Log level (overrides the configuration file; RUST_LOG overrides both)
    #[arg(long = "log-level", value_enum, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe this node's resources every 2 s and report transitions
    Health,

    /// Elect a controller replica every 30 s and publish it
    Discover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    logging::init_logging(&config)?;

    match cli.command {
        Command::Health => daemon::run_health(&config).await?,
        Command::Discover => daemon::run_discover(&config).await?,
    }

    Ok(())
}
