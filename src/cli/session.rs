use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use action_primitives::{ActionRecorder, RecordedAction};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct SessionArgs {
    /// Session file written by `waypoint run`
    pub file: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub file: PathBuf,
    pub actions: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub by_type: BTreeMap<String, usize>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<RecordedAction>,
}

impl SessionSummary {
    fn from_actions(file: PathBuf, steps: Vec<RecordedAction>) -> Self {
        let mut by_type = BTreeMap::new();
        for action in &steps {
            *by_type.entry(action.action.label().to_string()).or_insert(0) += 1;
        }
        let succeeded = steps.iter().filter(|action| action.success).count();
        Self {
            file,
            actions: steps.len(),
            succeeded,
            failed: steps.len() - succeeded,
            by_type,
            started_at: steps.iter().map(|action| action.timestamp).min(),
            finished_at: steps.iter().map(|action| action.timestamp).max(),
            steps,
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Session {}", self.file.display());
        let _ = writeln!(
            out,
            "  {} actions ({} ok, {} failed)",
            self.actions, self.succeeded, self.failed
        );
        if let (Some(start), Some(end)) = (self.started_at, self.finished_at) {
            let _ = writeln!(
                out,
                "  {} .. {} ({} ms)",
                start.to_rfc3339(),
                end.to_rfc3339(),
                (end - start).num_milliseconds()
            );
        }
        for (kind, count) in &self.by_type {
            let _ = writeln!(out, "  {kind:<14} {count}");
        }
        for (idx, action) in self.steps.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. {} {:<14} {:<4} {}",
                idx + 1,
                action.timestamp.format("%H:%M:%S%.3f"),
                action.action.label(),
                if action.success { "ok" } else { "FAIL" },
                action.selector.as_deref().unwrap_or("-")
            );
        }
        out
    }
}

pub async fn cmd_session(args: SessionArgs, ctx: &CliContext) -> Result<()> {
    let steps = ActionRecorder::load(&args.file)
        .with_context(|| format!("loading session {}", args.file.display()))?;
    let summary = SessionSummary::from_actions(args.file, steps);
    emit(ctx.output(), &summary, SessionSummary::render)
}
