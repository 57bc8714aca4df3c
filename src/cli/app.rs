use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::analyze::cmd_analyze;
use super::commands::Commands;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, load_local_env_overrides};
use super::serve::cmd_serve;

pub async fn run() -> Result<()> {
    load_local_env_overrides();
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug, cli.log_json)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("BUILD_DATE"),
        git = env!("GIT_HASH"),
        "starting accessly"
    );

    let config = load_config(cli.config.as_deref()).await?.config;

    let outcome = match cli.command {
        Commands::Serve(args) => cmd_serve(args, config).await,
        Commands::Analyze(args) => cmd_analyze(args, config).await,
    };
    if let Err(err) = &outcome {
        error!("command failed: {err:#}");
    }
    outcome
}
