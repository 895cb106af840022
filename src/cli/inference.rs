use std::fmt::Write as _;
use std::path::PathBuf;

use agent_core::{summarize, InferenceSummary};
use anyhow::{Context, Result};
use clap::Args;

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct InferenceArgs {
    /// summary.csv from an inference log directory; defaults to the configured one
    pub file: Option<PathBuf>,
}

pub async fn cmd_inference(args: InferenceArgs, ctx: &CliContext) -> Result<()> {
    let path = args.file.unwrap_or_else(|| {
        ctx.config()
            .inference_log
            .dir
            .join(agent_core::inference_log::SUMMARY_FILE)
    });
    let summary =
        summarize(&path).with_context(|| format!("summarizing {}", path.display()))?;
    emit(ctx.output(), &summary, render)
}

fn render(summary: &InferenceSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<10} {:>6} {:>14} {:>18} {:>12}",
        "call", "count", "prompt_tokens", "completion_tokens", "time_ms"
    );
    for (call_type, totals) in &summary.by_type {
        let _ = writeln!(
            out,
            "{:<10} {:>6} {:>14} {:>18} {:>12}",
            call_type,
            totals.calls,
            totals.prompt_tokens,
            totals.completion_tokens,
            totals.inference_time_ms
        );
    }
    let _ = writeln!(
        out,
        "{:<10} {:>6} {:>14} {:>18} {:>12}",
        "total",
        summary.total.calls,
        summary.total.prompt_tokens,
        summary.total.completion_tokens,
        summary.total.inference_time_ms
    );
    out
}
