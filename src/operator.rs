//! Goal-driven loop over perception, inference and execution.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use action_primitives::{ActionError, ActionExecutor, ActionOutcome, AgentAction, MethodCall};
use agent_core::{
    ActDecision, ActParams, AgentError, InferencePipeline, LlmClient, VerifyParams, VerifyVerdict,
};
use cdp_adapter::PageDriver;
use perceiver_structural::{find_node, PerceiverError, PerceiverOptions, StructuralPerceiver};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use waypoint_core_types::TokenUsage;

/// Vertical distance scrolled when the model skips the visible section.
const SKIP_SCROLL_PX: f64 = 600.0;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error(transparent)]
    Perceiver(#[from] PerceiverError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Action(#[from] ActionError),
}

#[derive(Clone, Debug)]
pub struct OperatorOptions {
    pub max_steps: usize,
    /// Values substituted for `<|KEY|>` placeholders in chosen arguments.
    pub variables: BTreeMap<String, String>,
}

impl Default for OperatorOptions {
    fn default() -> Self {
        Self {
            max_steps: 10,
            variables: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStep {
    pub index: usize,
    pub decision: ActDecision,
    pub selector: Option<String>,
    pub outcome: Option<ActionOutcome>,
    pub error: Option<String>,
}

impl OperatorStep {
    pub fn succeeded(&self) -> bool {
        self.outcome.as_ref().map_or(false, |outcome| outcome.success)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorReport {
    pub run_id: String,
    pub completed: bool,
    pub steps: Vec<OperatorStep>,
    pub usage: TokenUsage,
    pub verdict: Option<VerifyVerdict>,
}

pub struct Operator<D: PageDriver + 'static, C: LlmClient> {
    perceiver: StructuralPerceiver<D>,
    executor: ActionExecutor<D>,
    pipeline: InferencePipeline<C>,
    options: OperatorOptions,
}

impl<D: PageDriver + 'static, C: LlmClient> Operator<D, C> {
    pub fn new(executor: ActionExecutor<D>, pipeline: InferencePipeline<C>) -> Self {
        Self {
            perceiver: StructuralPerceiver::new(Arc::clone(executor.driver())),
            executor,
            pipeline,
            options: OperatorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: OperatorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_perceiver_options(mut self, options: PerceiverOptions) -> Self {
        self.perceiver = StructuralPerceiver::new(Arc::clone(self.executor.driver()))
            .with_options(options);
        self
    }

    pub fn executor(&self) -> &ActionExecutor<D> {
        &self.executor
    }

    pub fn pipeline(&self) -> &InferencePipeline<C> {
        &self.pipeline
    }

    /// Drives the page toward `goal` until the model's completion claim is
    /// verified, the model has nothing to do, or `max_steps` is reached.
    pub async fn run(&self, goal: &str) -> Result<OperatorReport, OperatorError> {
        let run_id = Uuid::new_v4().to_string();
        let mut report = OperatorReport {
            run_id: run_id.clone(),
            completed: false,
            steps: Vec::new(),
            usage: TokenUsage::default(),
            verdict: None,
        };
        info!(run_id = %run_id, goal, max_steps = self.options.max_steps, "operator started");

        for index in 0..self.options.max_steps {
            let tree = self.perceiver.accessibility_tree().await?;
            let act = self
                .pipeline
                .act(&ActParams {
                    goal: goal.to_string(),
                    steps: render_history(&report.steps),
                    dom_elements: tree.simplified.clone(),
                    variables: self.options.variables.clone(),
                    request_id: format!("{run_id}-act-{index}"),
                })
                .await?;
            report.usage += act.usage;

            let Some(decision) = act.decision else {
                if act.skipped.is_some() {
                    info!(run_id = %run_id, step = index, "model skipped section; scrolling");
                    self.executor
                        .execute(&AgentAction::Scroll {
                            x: None,
                            y: None,
                            scroll_x: 0.0,
                            scroll_y: SKIP_SCROLL_PX,
                        })
                        .await
                        .or_else(tolerate_action_error)?;
                    continue;
                }
                info!(run_id = %run_id, step = index, "model proposed no action; stopping");
                break;
            };

            let selector = find_node(&tree.tree, &decision.element).and_then(|node| node.xpath.clone());
            let mut step = OperatorStep {
                index,
                decision: decision.clone(),
                selector: selector.clone(),
                outcome: None,
                error: None,
            };

            match selector {
                Some(selector) => {
                    let call = MethodCall {
                        method: decision.method.clone(),
                        selector,
                        arguments: decision.arguments.clone(),
                    };
                    match self.executor.perform_method(&call).await {
                        Ok(outcome) => step.outcome = Some(outcome),
                        Err(err) if is_fatal(&err) => return Err(err.into()),
                        Err(err) => step.error = Some(err.to_string()),
                    }
                }
                None => {
                    warn!(run_id = %run_id, element = %decision.element, "element has no xpath");
                    step.error = Some(format!("element {} is not locatable", decision.element));
                }
            }
            let claims_completion = decision.completed && step.error.is_none();
            report.steps.push(step);

            if claims_completion {
                let page = self.perceiver.accessibility_tree().await?;
                let verify = self
                    .pipeline
                    .verify_act_completion(&VerifyParams {
                        goal: goal.to_string(),
                        steps: render_history(&report.steps),
                        dom_elements: page.simplified,
                        request_id: format!("{run_id}-verify-{index}"),
                    })
                    .await?;
                report.usage += verify.usage;
                report.verdict = Some(verify.verdict);
                if verify.completed {
                    report.completed = true;
                    break;
                }
            }
        }

        info!(
            run_id = %run_id,
            completed = report.completed,
            steps = report.steps.len(),
            prompt_tokens = report.usage.prompt_tokens,
            completion_tokens = report.usage.completion_tokens,
            "operator finished"
        );
        Ok(report)
    }
}

/// Browser-level failures end the run; element-level ones are fed back to the model.
fn is_fatal(err: &ActionError) -> bool {
    matches!(err, ActionError::CdpIo(_) | ActionError::Internal(_))
}

fn tolerate_action_error(err: ActionError) -> Result<ActionOutcome, ActionError> {
    if is_fatal(&err) {
        Err(err)
    } else {
        warn!(error = %err, "scroll after skip failed");
        Ok(ActionOutcome::default())
    }
}

/// One line per step: `1. fill [3] Enter the email (ok)`.
pub fn render_history(steps: &[OperatorStep]) -> String {
    let mut out = String::new();
    for step in steps {
        let status = match (&step.error, step.succeeded()) {
            (Some(err), _) => format!("failed: {err}"),
            (None, true) => "ok".to_string(),
            (None, false) => "failed".to_string(),
        };
        let _ = writeln!(
            out,
            "{}. {} [{}] {} ({status})",
            step.index + 1,
            step.decision.method,
            step.decision.element,
            step.decision.step
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(method: &str, element: &str, step: &str) -> ActDecision {
        ActDecision {
            method: method.into(),
            element: element.into(),
            arguments: Vec::new(),
            step: step.into(),
            why: None,
            completed: false,
        }
    }

    #[test]
    fn history_lists_outcomes() {
        let steps = vec![
            OperatorStep {
                index: 0,
                decision: decision("fill", "3", "Enter the email"),
                selector: Some("/html/body/input".into()),
                outcome: Some(ActionOutcome {
                    success: true,
                    ..ActionOutcome::default()
                }),
                error: None,
            },
            OperatorStep {
                index: 1,
                decision: decision("click", "9", "Submit"),
                selector: None,
                outcome: None,
                error: Some("element 9 is not locatable".into()),
            },
        ];
        assert_eq!(
            render_history(&steps),
            "1. fill [3] Enter the email (ok)\n2. click [9] Submit (failed: element 9 is not locatable)\n"
        );
        assert_eq!(render_history(&[]), "");
    }

    #[test]
    fn only_browser_failures_are_fatal() {
        assert!(is_fatal(&ActionError::CdpIo("closed".into())));
        assert!(!is_fatal(&ActionError::ElementNotFound("x".into())));
        assert!(tolerate_action_error(ActionError::ElementNotFound("x".into())).is_ok());
    }
}
