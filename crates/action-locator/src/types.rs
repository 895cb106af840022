//! Core types for selector synthesis

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Selector synthesis tier, highest priority first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorTier {
    /// `data-testid` and friends
    TestAttribute,
    /// Non-generated `id`
    StableId,
    /// ARIA role + accessible name
    AriaRoleName,
    /// `name`, `placeholder`, `for`, `type`
    FormAttribute,
    /// Other ARIA attributes
    AriaAttribute,
    /// Up to two stable class names
    ClassName,
    /// `tag:nth-of-type(n)`
    NthOfType,
    /// Stable ancestor anchor plus relative positional path
    AncestorPath,
    /// `body`-rooted `nth-child` path; never verified
    StructuralPath,
}

impl SelectorTier {
    /// Get tier name as string
    pub fn name(&self) -> &'static str {
        match self {
            SelectorTier::TestAttribute => "test-attribute",
            SelectorTier::StableId => "stable-id",
            SelectorTier::AriaRoleName => "aria-role-name",
            SelectorTier::FormAttribute => "form-attribute",
            SelectorTier::AriaAttribute => "aria-attribute",
            SelectorTier::ClassName => "class-name",
            SelectorTier::NthOfType => "nth-of-type",
            SelectorTier::AncestorPath => "ancestor-path",
            SelectorTier::StructuralPath => "structural-path",
        }
    }

    /// 1-based priority rank
    pub fn rank(&self) -> u8 {
        *self as u8 + 1
    }

    /// Get all tiers in fallback order
    pub fn fallback_chain() -> Vec<SelectorTier> {
        vec![
            SelectorTier::TestAttribute,
            SelectorTier::StableId,
            SelectorTier::AriaRoleName,
            SelectorTier::FormAttribute,
            SelectorTier::AriaAttribute,
            SelectorTier::ClassName,
            SelectorTier::NthOfType,
            SelectorTier::AncestorPath,
            SelectorTier::StructuralPath,
        ]
    }
}

impl fmt::Display for SelectorTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    Css,
    XPath,
}

/// A selector string and the tier that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorCandidate {
    pub selector: String,
    pub tier: SelectorTier,
    pub kind: SelectorKind,
}

impl SelectorCandidate {
    pub fn css(selector: impl Into<String>, tier: SelectorTier) -> Self {
        Self {
            selector: selector.into(),
            tier,
            kind: SelectorKind::Css,
        }
    }

    pub fn xpath(selector: impl Into<String>, tier: SelectorTier) -> Self {
        Self {
            selector: selector.into(),
            tier,
            kind: SelectorKind::XPath,
        }
    }
}

/// What to synthesize a selector for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetRef {
    /// Topmost element under a viewport coordinate (descending into open shadow roots)
    Point { x: f64, y: f64 },
    /// The deepest focused element
    Focused,
}

/// Structural description of one element, as reported by the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementDescriptor {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    /// Attributes other than `id`, `class`, and `style`
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub classes: Vec<String>,
    /// Trimmed text content; absent for ancestors
    #[serde(default)]
    pub text: Option<String>,
    /// 1-based index among same-tag siblings
    #[serde(default = "one")]
    pub nth_of_type: u32,
    /// 1-based index among element siblings
    #[serde(default = "one")]
    pub nth_child: u32,
    /// Ancestor chain, nearest first
    #[serde(default)]
    pub ancestors: Vec<ElementDescriptor>,
}

fn one() -> u32 {
    1
}

impl ElementDescriptor {
    /// Non-empty attribute value
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn explicit_role(&self) -> Option<&str> {
        self.attr("role")
    }
}

/// Result of verifying candidates in the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeOutcome {
    /// Index of the first candidate that uniquely matched the target
    #[serde(default)]
    pub matched: Option<usize>,
    #[serde(default)]
    pub checked: usize,
    #[serde(default)]
    pub timed_out: bool,
}

impl ProbeOutcome {
    pub fn timed_out(checked: usize) -> Self {
        Self {
            matched: None,
            checked,
            timed_out: true,
        }
    }
}

/// The selector chosen for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesizedSelector {
    pub selector: String,
    pub tier: SelectorTier,
    pub kind: SelectorKind,
    pub candidates_checked: usize,
    pub timed_out: bool,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tier_ranks_follow_chain() {
        let chain = SelectorTier::fallback_chain();
        assert_eq!(chain.len(), 9);
        for (idx, tier) in chain.iter().enumerate() {
            assert_eq!(tier.rank() as usize, idx + 1);
        }
        assert!(SelectorTier::StableId < SelectorTier::ClassName);
    }

    #[test]
    fn test_descriptor_deserializes_from_page_shape() {
        let desc: ElementDescriptor = serde_json::from_value(json!({
            "tag": "button",
            "id": null,
            "attributes": { "type": "submit", "aria-label": "  " },
            "classes": ["btn"],
            "text": "Save",
            "nthOfType": 2,
            "nthChild": 4,
            "ancestors": [{ "tag": "form", "nthOfType": 1, "nthChild": 1 }]
        }))
        .unwrap();
        assert_eq!(desc.attr("type"), Some("submit"));
        assert_eq!(desc.attr("aria-label"), None);
        assert_eq!(desc.ancestors[0].tag, "form");
        assert!(desc.ancestors[0].ancestors.is_empty());
    }

    #[test]
    fn test_target_ref_wire_format() {
        let point = serde_json::to_value(TargetRef::Point { x: 1.0, y: 2.0 }).unwrap();
        assert_eq!(point, json!({ "type": "point", "x": 1.0, "y": 2.0 }));
        assert_eq!(
            serde_json::to_value(TargetRef::Focused).unwrap(),
            json!({ "type": "focused" })
        );
    }
}
