use std::path::Path;

use crate::cli::context::CliContext;
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tokio::fs;
use tracing::info;
use waypoint_cli::WaypointConfig;

use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration (file, defaults and env overrides)
    Show,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Validate the configuration file
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let path = ctx.config_path().to_path_buf();
    match args.action {
        ConfigAction::Show => {
            let source = if ctx.config_from_file() {
                path.display().to_string()
            } else {
                format!("defaults; no file at {}", path.display())
            };
            emit(ctx.output(), ctx.config(), |config| {
                let yaml = config
                    .to_yaml()
                    .unwrap_or_else(|err| format!("# failed to render: {err}\n"));
                format!("# Current configuration ({source}):\n{yaml}")
            })?;
        }
        ConfigAction::Init { force } => {
            if fs::try_exists(&path).await? && !force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    path.display()
                );
            }
            save_config_file(&path, &WaypointConfig::default()).await?;
            info!(path = %path.display(), "wrote default configuration");
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Validate => {
            let config = if fs::try_exists(&path).await? {
                let raw = fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let mut config = WaypointConfig::from_yaml(&raw, &path)?;
                config.apply_env_overrides();
                config
            } else {
                println!(
                    "No configuration file at {}; checking defaults",
                    path.display()
                );
                ctx.config().clone()
            };
            let issues = config.validate();
            if issues.is_empty() {
                println!("Configuration is valid");
            } else {
                for issue in &issues {
                    println!("- {issue}");
                }
                bail!("configuration has {} problem(s)", issues.len());
            }
        }
    }

    Ok(())
}

async fn save_config_file(path: &Path, config: &WaypointConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let serialized = config.to_yaml()?;
    fs::write(path, serialized)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
