use clap::Subcommand;

use super::config::ConfigArgs;
use super::inference::InferenceArgs;
use super::run::RunArgs;
use super::session::SessionArgs;
use super::tree::TreeArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Build and print the simplified tree from a saved getFullAXTree response
    Tree(TreeArgs),

    /// Summarise a recorded session file
    Session(SessionArgs),

    /// Total tokens and latency from an inference summary.csv
    Inference(InferenceArgs),

    /// Manage Waypoint configuration
    Config(ConfigArgs),

    /// Drive a live browser toward a goal
    Run(RunArgs),
}
