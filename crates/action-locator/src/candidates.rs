//! Candidate generation, tiers 1 through 9.

use std::collections::HashSet;

use crate::heuristics::{
    css_attr_value, css_escape_ident, implicit_role, is_dynamic_id,
    stable_classes, stable_id, text_name, xpath_literal, ARIA_ATTRIBUTES, FORM_ATTRIBUTES,
    LANDMARK_TAGS, TEST_ATTRIBUTES, TEXT_NAMED_TAGS,
};
use crate::types::{ElementDescriptor, SelectorCandidate, SelectorTier};

/// Attributes that hold element ids and therefore inherit their volatility.
const ID_REFERENCE_ATTRIBUTES: &[&str] = &["aria-labelledby", "aria-describedby", "aria-controls"];

/// Verified candidates for tiers 1-8, in priority order, without duplicates.
pub fn generate_candidates(desc: &ElementDescriptor) -> Vec<SelectorCandidate> {
    let mut out = Candidates::default();
    let tag = desc.tag.as_str();

    for attr in TEST_ATTRIBUTES {
        if let Some(value) = desc.attr(attr) {
            out.push(SelectorCandidate::css(
                format!("[{attr}={}]", css_attr_value(value)),
                SelectorTier::TestAttribute,
            ));
        }
    }

    if let Some(id) = stable_id(desc) {
        out.push(SelectorCandidate::css(
            format!("#{}", css_escape_ident(id)),
            SelectorTier::StableId,
        ));
    }

    for candidate in role_name_candidates(desc) {
        out.push(candidate);
    }

    for attr in FORM_ATTRIBUTES {
        if let Some(value) = desc.attr(attr) {
            out.push(SelectorCandidate::css(
                format!("{tag}[{attr}={}]", css_attr_value(value)),
                SelectorTier::FormAttribute,
            ));
        }
    }

    for attr in ARIA_ATTRIBUTES {
        let Some(value) = desc.attr(attr) else {
            continue;
        };
        if ID_REFERENCE_ATTRIBUTES.contains(attr)
            && value.split_whitespace().any(is_dynamic_id)
        {
            continue;
        }
        out.push(SelectorCandidate::css(
            format!("{tag}[{attr}={}]", css_attr_value(value)),
            SelectorTier::AriaAttribute,
        ));
    }

    let classes = stable_classes(desc);
    if let Some(first) = classes.first() {
        out.push(SelectorCandidate::css(
            format!("{tag}.{}", css_escape_ident(first)),
            SelectorTier::ClassName,
        ));
    }
    if classes.len() == 2 {
        out.push(SelectorCandidate::css(
            format!(
                "{tag}.{}.{}",
                css_escape_ident(classes[0]),
                css_escape_ident(classes[1])
            ),
            SelectorTier::ClassName,
        ));
    }

    out.push(SelectorCandidate::css(
        nth_of_type_step(desc),
        SelectorTier::NthOfType,
    ));

    if let Some(selector) = ancestor_path(desc) {
        out.push(SelectorCandidate::css(selector, SelectorTier::AncestorPath));
    }

    out.into_vec()
}

/// Tier 9: `body > … > tag:nth-child(k)`. Falls back to the bare tag outside `body`.
pub fn structural_path(desc: &ElementDescriptor) -> String {
    match desc.tag.as_str() {
        "body" | "html" => return desc.tag.clone(),
        _ => {}
    }
    let Some(body_idx) = desc.ancestors.iter().position(|a| a.tag == "body") else {
        return desc.tag.clone();
    };

    let mut steps = vec!["body".to_string()];
    for ancestor in desc.ancestors[..body_idx].iter().rev() {
        steps.push(format!("{}:nth-child({})", ancestor.tag, ancestor.nth_child));
    }
    steps.push(format!("{}:nth-child({})", desc.tag, desc.nth_child));
    steps.join(" > ")
}

fn role_name_candidates(desc: &ElementDescriptor) -> Vec<SelectorCandidate> {
    let mut out = Vec::new();
    let tag = desc.tag.as_str();

    if let Some(label) = desc.attr("aria-label") {
        let selector = match desc.explicit_role() {
            Some(role) => format!(
                "[role={}][aria-label={}]",
                css_attr_value(role),
                css_attr_value(label)
            ),
            None if implicit_role(desc).is_some() => {
                format!("{tag}[aria-label={}]", css_attr_value(label))
            }
            None => String::new(),
        };
        if !selector.is_empty() {
            out.push(SelectorCandidate::css(selector, SelectorTier::AriaRoleName));
        }
    }

    if let Some(text) = text_name(desc) {
        if TEXT_NAMED_TAGS.contains(&tag) {
            out.push(SelectorCandidate::xpath(
                format!("//{tag}[normalize-space(.)={}]", xpath_literal(&text)),
                SelectorTier::AriaRoleName,
            ));
        } else if let Some(role) = desc.explicit_role() {
            out.push(SelectorCandidate::xpath(
                format!(
                    "//*[@role={}][normalize-space(.)={}]",
                    xpath_literal(role),
                    xpath_literal(&text)
                ),
                SelectorTier::AriaRoleName,
            ));
        }
    }
    out
}

fn nth_of_type_step(desc: &ElementDescriptor) -> String {
    format!("{}:nth-of-type({})", desc.tag, desc.nth_of_type)
}

/// Anchor selector for an ancestor: tiers 1-3 (CSS only) or a landmark tag.
fn ancestor_anchor(ancestor: &ElementDescriptor) -> Option<String> {
    for attr in TEST_ATTRIBUTES {
        if let Some(value) = ancestor.attr(attr) {
            return Some(format!("[{attr}={}]", css_attr_value(value)));
        }
    }
    if let Some(id) = stable_id(ancestor) {
        return Some(format!("#{}", css_escape_ident(id)));
    }
    if let (Some(role), Some(label)) = (ancestor.explicit_role(), ancestor.attr("aria-label")) {
        return Some(format!(
            "[role={}][aria-label={}]",
            css_attr_value(role),
            css_attr_value(label)
        ));
    }
    LANDMARK_TAGS
        .contains(&ancestor.tag.as_str())
        .then(|| ancestor.tag.clone())
}

fn ancestor_path(desc: &ElementDescriptor) -> Option<String> {
    let (idx, anchor) = desc
        .ancestors
        .iter()
        .take_while(|a| a.tag != "body" && a.tag != "html")
        .enumerate()
        .find_map(|(idx, ancestor)| ancestor_anchor(ancestor).map(|anchor| (idx, anchor)))?;

    let mut steps = vec![anchor];
    for between in desc.ancestors[..idx].iter().rev() {
        steps.push(nth_of_type_step(between));
    }
    steps.push(nth_of_type_step(desc));
    Some(steps.join(" > "))
}

#[derive(Default)]
struct Candidates {
    seen: HashSet<String>,
    items: Vec<SelectorCandidate>,
}

impl Candidates {
    fn push(&mut self, candidate: SelectorCandidate) {
        if self.seen.insert(candidate.selector.clone()) {
            self.items.push(candidate);
        }
    }

    fn into_vec(self) -> Vec<SelectorCandidate> {
        self.items
    }
}
