use super::config::cmd_config;
use super::env::CliArgs;
use super::inference::cmd_inference;
use super::run::cmd_run;
use super::session::cmd_session;
use super::tree::cmd_tree;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Tree(args) => cmd_tree(args, ctx).await,
        Commands::Session(args) => cmd_session(args, ctx).await,
        Commands::Inference(args) => cmd_inference(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await,
        Commands::Run(args) => cmd_run(args, ctx).await,
    }
}
