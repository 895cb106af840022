use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use action_primitives::{ActionExecutor, ActionRecorder};
use agent_core::{InferenceLog, InferencePipeline, OpenAiCompatibleClient};
use anyhow::{anyhow, Context, Result};
use cdp_adapter::{CdpBrowser, PageDriver};
use clap::Args;
use tracing::{info, warn};
use waypoint_cli::{Operator, OperatorOptions, OperatorReport};

use super::context::CliContext;
use super::output::emit;

const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Page to open before the first step
    #[arg(long)]
    pub url: String,

    /// Natural-language goal
    #[arg(long)]
    pub goal: String,

    #[arg(long, default_value_t = 10)]
    pub max_steps: usize,

    /// Placeholder values as KEY=VALUE; the model only sees <|KEY|>
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub variables: Vec<String>,

    /// Show the browser window regardless of configuration
    #[arg(long)]
    pub headed: bool,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    config.ensure_valid()?;
    let variables = parse_variables(&args.variables)?;

    let client = OpenAiCompatibleClient::new(config.llm.client_config()?)
        .context("building model client")?;
    let mut pipeline = InferencePipeline::with_config(client, config.llm.pipeline_config());
    if config.inference_log.enabled {
        pipeline = pipeline.with_log(InferenceLog::new(&config.inference_log.dir));
    }

    let mut browser_config = config.browser.clone();
    if args.headed {
        browser_config.headless = false;
    }
    let browser = CdpBrowser::launch(browser_config)
        .await
        .context("launching browser")?;
    let page = Arc::new(browser.new_page(&args.url).await.context("opening page")?);
    if !page.wait_for_load(PAGE_LOAD_TIMEOUT).await? {
        warn!(url = %args.url, "page did not finish loading; continuing");
    }

    let recorder = Arc::new(ActionRecorder::new());
    let session_id = recorder.start_session();
    let executor = ActionExecutor::with_config(
        Arc::clone(&page),
        Arc::clone(&recorder),
        config.executor.clone(),
        config.locator.clone(),
    );
    let operator = Operator::new(executor, pipeline)
        .with_perceiver_options(config.perceiver.clone())
        .with_options(OperatorOptions {
            max_steps: args.max_steps,
            variables,
        });

    info!(session = %session_id, url = %args.url, goal = %args.goal, "run started");
    let result = operator.run(&args.goal).await;

    if config.recording.enabled && !recorder.is_empty() {
        match recorder.end_session(&config.recording.dir) {
            Ok(path) => info!(path = %path.display(), "session saved"),
            Err(err) => warn!(error = %err, "failed to save session"),
        }
    }
    if let Err(err) = page.close_target(page.target_id()).await {
        warn!(error = %err, "failed to close page");
    }

    let report = result?;
    emit(ctx.output(), &report, render_report)
}

fn parse_variables(raw: &[String]) -> Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|entry| {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| anyhow!("variable {entry:?} is not KEY=VALUE"))?;
            let key = key.trim();
            if key.is_empty() {
                return Err(anyhow!("variable {entry:?} has an empty key"));
            }
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

fn render_report(report: &OperatorReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Run {}: {}",
        report.run_id,
        if report.completed { "completed" } else { "not completed" }
    );
    for step in &report.steps {
        let status = match (&step.error, step.succeeded()) {
            (Some(err), _) => format!("error: {err}"),
            (None, true) => "ok".to_string(),
            (None, false) => "failed".to_string(),
        };
        let _ = writeln!(
            out,
            "{:>3}. {} [{}] {} -> {}",
            step.index + 1,
            step.decision.method,
            step.decision.element,
            step.decision.step,
            status
        );
    }
    let _ = writeln!(
        out,
        "tokens: {} prompt / {} completion",
        report.usage.prompt_tokens, report.usage.completion_tokens
    );
    out
}
