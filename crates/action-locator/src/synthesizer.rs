//! Tiered selector synthesis with a wall-clock budget.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::candidates::{generate_candidates, structural_path};
use crate::errors::LocatorError;
use crate::probe::SelectorProbe;
use crate::types::{
    ElementDescriptor, ProbeOutcome, SelectorKind, SelectorTier, SynthesizedSelector, TargetRef,
};

/// Extra time allowed for the verification round-trip beyond the in-page budget.
const ROUND_TRIP_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Wall-clock budget for candidate verification
    pub budget_ms: u64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self { budget_ms: 50 }
    }
}

impl LocatorConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_millis(self.budget_ms)
    }
}

/// Produces the most stable selector that uniquely identifies a target element.
pub struct SelectorSynthesizer<P> {
    probe: P,
    config: LocatorConfig,
}

impl<P: SelectorProbe> SelectorSynthesizer<P> {
    pub fn new(probe: P) -> Self {
        Self::with_config(probe, LocatorConfig::default())
    }

    pub fn with_config(probe: P, config: LocatorConfig) -> Self {
        Self { probe, config }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Selector for the topmost element at a viewport coordinate.
    pub async fn selector_for_point(
        &self,
        x: f64,
        y: f64,
    ) -> Result<Option<SynthesizedSelector>, LocatorError> {
        self.synthesize(TargetRef::Point { x, y }).await
    }

    /// Selector for the focused element; `None` when focus rests on the document body.
    pub async fn selector_for_focused_element(
        &self,
    ) -> Result<Option<SynthesizedSelector>, LocatorError> {
        self.synthesize(TargetRef::Focused).await
    }

    pub async fn synthesize(
        &self,
        target: TargetRef,
    ) -> Result<Option<SynthesizedSelector>, LocatorError> {
        let budget = self.config.budget();
        let Some(desc) = self.probe.describe(target).await? else {
            debug!(?target, "no element for selector synthesis");
            return Ok(None);
        };

        // The budget covers candidate verification only, not the describe round-trip.
        let started = Instant::now();
        let candidates = generate_candidates(&desc);
        let remaining = budget.saturating_sub(started.elapsed());
        let outcome = if remaining.is_zero() {
            ProbeOutcome::timed_out(0)
        } else {
            match timeout(
                remaining + ROUND_TRIP_GRACE,
                self.probe.first_unique(target, &candidates, remaining),
            )
            .await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    warn!(error = %err, "selector verification failed; using structural path");
                    ProbeOutcome::default()
                }
                Err(_) => ProbeOutcome::timed_out(0),
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Some(candidate) = outcome.matched.and_then(|idx| candidates.get(idx)) {
            debug!(
                selector = %candidate.selector,
                tier = %candidate.tier,
                checked = outcome.checked,
                elapsed_ms,
                "synthesized selector"
            );
            return Ok(Some(SynthesizedSelector {
                selector: candidate.selector.clone(),
                tier: candidate.tier,
                kind: candidate.kind,
                candidates_checked: outcome.checked,
                timed_out: false,
                elapsed_ms,
            }));
        }

        if outcome.timed_out {
            debug!(
                checked = outcome.checked,
                budget_ms = self.config.budget_ms,
                "selector budget exhausted"
            );
        }
        Ok(Some(structural_selector(&desc, outcome, elapsed_ms)))
    }
}

fn structural_selector(
    desc: &ElementDescriptor,
    outcome: ProbeOutcome,
    elapsed_ms: u64,
) -> SynthesizedSelector {
    SynthesizedSelector {
        selector: structural_path(desc),
        tier: SelectorTier::StructuralPath,
        kind: SelectorKind::Css,
        candidates_checked: outcome.checked,
        timed_out: outcome.timed_out,
        elapsed_ms,
    }
}
