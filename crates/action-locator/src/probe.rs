//! In-page probing: describing the target and verifying candidate uniqueness.
//!
//! Both scripts resolve the target from scratch and are pure with respect to page state;
//! the verification deadline is passed in by the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::PageDriver;
use serde_json::{json, Value};
use tracing::trace;

use crate::errors::LocatorError;
use crate::types::{ElementDescriptor, ProbeOutcome, SelectorCandidate, TargetRef};

/// Read-only view of the live document used by the synthesizer.
#[async_trait]
pub trait SelectorProbe: Send + Sync {
    /// Structural description of the target, or `None` when nothing is there.
    async fn describe(&self, target: TargetRef) -> Result<Option<ElementDescriptor>, LocatorError>;

    /// Index of the first candidate matching exactly one element, that element being the target.
    /// Stops checking once `budget` has elapsed.
    async fn first_unique(
        &self,
        target: TargetRef,
        candidates: &[SelectorCandidate],
        budget: Duration,
    ) -> Result<ProbeOutcome, LocatorError>;
}

const RESOLVE_TARGET: &str = r#"
function resolveTarget(target) {
  if (target.type === 'point') {
    let el = document.elementFromPoint(target.x, target.y);
    while (el && el.shadowRoot) {
      const inner = el.shadowRoot.elementFromPoint(target.x, target.y);
      if (!inner || inner === el) break;
      el = inner;
    }
    return el;
  }
  let el = document.activeElement;
  while (el && el.shadowRoot && el.shadowRoot.activeElement) {
    el = el.shadowRoot.activeElement;
  }
  if (!el || el === document.body || el === document.documentElement) return null;
  return el;
}
"#;

const DESCRIBE: &str = r#"
function describeElement(el, withText) {
  const attributes = {};
  for (const attr of Array.from(el.attributes)) {
    if (attr.name === 'id' || attr.name === 'class' || attr.name === 'style') continue;
    attributes[attr.name] = attr.value;
  }
  const parent = el.parentElement;
  const siblings = parent ? Array.from(parent.children) : [el];
  const sameTag = siblings.filter((s) => s.tagName === el.tagName);
  let text = null;
  if (withText) {
    text = (el.innerText || el.textContent || '').replace(/\s+/g, ' ').trim().slice(0, 200);
  }
  return {
    tag: el.tagName.toLowerCase(),
    id: el.id || null,
    attributes,
    classes: Array.from(el.classList),
    text,
    nthOfType: sameTag.indexOf(el) + 1,
    nthChild: siblings.indexOf(el) + 1,
    ancestors: [],
  };
}
function describe(target) {
  const el = resolveTarget(target);
  if (!el) return null;
  const desc = describeElement(el, true);
  let cursor = el.parentElement;
  while (cursor) {
    desc.ancestors.push(describeElement(cursor, false));
    cursor = cursor.parentElement;
  }
  return desc;
}
"#;

const VERIFY: &str = r#"
function verify(target, candidates, budgetMs) {
  const el = resolveTarget(target);
  if (!el) return { matched: null, checked: 0, timedOut: false };
  const deadline = performance.now() + budgetMs;
  let checked = 0;
  for (let i = 0; i < candidates.length; i++) {
    if (performance.now() > deadline) return { matched: null, checked, timedOut: true };
    const candidate = candidates[i];
    checked++;
    try {
      if (candidate.kind === 'xpath') {
        const snap = document.evaluate(
          candidate.selector, document, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
        if (snap.snapshotLength === 1 && snap.snapshotItem(0) === el) {
          return { matched: i, checked, timedOut: false };
        }
      } else {
        const found = document.querySelectorAll(candidate.selector);
        if (found.length === 1 && found[0] === el) {
          return { matched: i, checked, timedOut: false };
        }
      }
    } catch (_) {}
  }
  return { matched: null, checked, timedOut: false };
}
"#;

/// Builds a self-contained expression invoking `entry` with JSON arguments.
fn invocation(helpers: &[&str], entry: &str, args: &[Value]) -> String {
    let args = args
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    format!("(() => {{\n{}\nreturn {entry}({args});\n}})()", helpers.concat())
}

pub fn describe_expression(target: TargetRef) -> String {
    invocation(&[RESOLVE_TARGET, DESCRIBE], "describe", &[json!(target)])
}

pub fn verify_expression(
    target: TargetRef,
    candidates: &[SelectorCandidate],
    budget: Duration,
) -> String {
    invocation(
        &[RESOLVE_TARGET, VERIFY],
        "verify",
        &[
            json!(target),
            json!(candidates),
            json!(budget.as_millis() as u64),
        ],
    )
}

/// [`SelectorProbe`] backed by script evaluation on a live page.
pub struct ScriptProbe<D> {
    driver: Arc<D>,
}

impl<D: PageDriver> ScriptProbe<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }
}

#[async_trait]
impl<D: PageDriver> SelectorProbe for ScriptProbe<D> {
    async fn describe(&self, target: TargetRef) -> Result<Option<ElementDescriptor>, LocatorError> {
        let value = self.driver.evaluate(&describe_expression(target)).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|err| LocatorError::MalformedProbe(format!("describe: {err}")))
    }

    async fn first_unique(
        &self,
        target: TargetRef,
        candidates: &[SelectorCandidate],
        budget: Duration,
    ) -> Result<ProbeOutcome, LocatorError> {
        if candidates.is_empty() {
            return Ok(ProbeOutcome::default());
        }
        let value = self
            .driver
            .evaluate(&verify_expression(target, candidates, budget))
            .await?;
        let outcome: ProbeOutcome = serde_json::from_value(value)
            .map_err(|err| LocatorError::MalformedProbe(format!("verify: {err}")))?;
        if let Some(idx) = outcome.matched {
            if idx >= candidates.len() {
                return Err(LocatorError::MalformedProbe(format!(
                    "verify matched index {idx} of {}",
                    candidates.len()
                )));
            }
        }
        trace!(
            checked = outcome.checked,
            matched = ?outcome.matched,
            timed_out = outcome.timed_out,
            "verified selector candidates"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SelectorTier;

    #[test]
    fn test_verify_expression_passes_budget_explicitly() {
        let candidates = vec![
            SelectorCandidate::css("#save", SelectorTier::StableId),
            SelectorCandidate::xpath("//button[normalize-space(.)=\"Save\"]", SelectorTier::AriaRoleName),
        ];
        let expr = verify_expression(
            TargetRef::Point { x: 10.0, y: 20.0 },
            &candidates,
            Duration::from_millis(50),
        );
        assert!(expr.starts_with("(() => {"));
        assert!(expr.contains("function resolveTarget"));
        assert!(expr.contains("return verify({"));
        assert!(expr.contains(r##""selector":"#save""##));
        assert!(expr.contains(r#""kind":"xpath""#));
        assert!(expr.ends_with(", 50);\n})()"));
        assert!(!expr.contains("function describe("));
    }

    #[test]
    fn test_describe_expression_for_focus() {
        let expr = describe_expression(TargetRef::Focused);
        assert!(expr.contains(r#"return describe({"type":"focused"});"#));
    }
}
