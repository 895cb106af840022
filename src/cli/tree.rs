use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use perceiver_structural::{
    flatten_raw_nodes, mark_scrollables, AccessibilityTreeBuilder, RawAxNode,
};
use serde_json::Value;
use tokio::fs;
use tracing::info;

use super::context::CliContext;
use super::output::emit;

#[derive(Args, Clone, Debug)]
pub struct TreeArgs {
    /// JSON file holding an Accessibility.getFullAXTree response
    pub file: PathBuf,

    /// Backend node ids to render as scrollable containers
    #[arg(long, value_delimiter = ',')]
    pub scrollable: Vec<i64>,

    /// Keep StaticText children that repeat their parent's name
    #[arg(long)]
    pub keep_redundant_text: bool,
}

pub async fn cmd_tree(args: TreeArgs, ctx: &CliContext) -> Result<()> {
    let raw = fs::read_to_string(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;
    let document: Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", args.file.display()))?;
    let nodes = extract_nodes(document)
        .with_context(|| format!("{} has no AX node list", args.file.display()))?;
    let raw_nodes: Vec<RawAxNode> =
        serde_json::from_value(nodes).context("decoding accessibility nodes")?;
    let count = raw_nodes.len();

    let (mut flat, id_to_url) = flatten_raw_nodes(raw_nodes);
    let scrollable: HashSet<i64> = args.scrollable.iter().copied().collect();
    mark_scrollables(&mut flat, &scrollable);

    let builder = if args.keep_redundant_text {
        AccessibilityTreeBuilder::new().keep_redundant_text()
    } else {
        AccessibilityTreeBuilder::new()
    };
    let mut result = builder.build(flat);
    result.id_to_url = id_to_url;
    info!(nodes = count, roots = result.tree.len(), "built accessibility tree");

    emit(ctx.output(), &result, |result| result.simplified.clone())
}

/// Accepts `{"nodes": [...]}`, a wrapped `{"result": {"nodes": [...]}}` or a bare array.
fn extract_nodes(document: Value) -> Option<Value> {
    match document {
        Value::Array(_) => Some(document),
        Value::Object(mut map) => match map.remove("nodes") {
            Some(nodes) => Some(nodes),
            None => map.remove("result").and_then(extract_nodes),
        },
        _ => None,
    }
}
