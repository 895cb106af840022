use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_local_env_overrides};

pub async fn run() -> Result<()> {
    load_local_env_overrides();
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug)?;

    info!(
        "Starting Waypoint v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("WAYPOINT_GIT_HASH")
    );

    let loaded = waypoint_cli::load_config(cli.config.as_deref())?;
    let ctx = CliContext::new(loaded, cli.output.clone());

    match dispatch(&cli, &ctx).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
