use std::path::PathBuf;

use clap::Parser;

use super::commands::Commands;
use super::output::OutputFormat;

/// Ground natural-language goals in live pages and drive them to completion.
#[derive(Parser)]
#[command(
    name = "waypoint",
    version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("WAYPOINT_GIT_HASH"), ")"),
    about
)]
pub struct CliArgs {
    /// YAML config; falls back to ./config/waypoint.yaml, then the user config dir
    #[arg(short, long, global = true, env = "WAYPOINT_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Level used when RUST_LOG is unset
    #[arg(
        long,
        global = true,
        default_value = "info",
        value_parser = ["trace", "debug", "info", "warn", "error"]
    )]
    pub log_level: String,

    /// Same as --log-level debug
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// How command results are printed on stdout
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}
