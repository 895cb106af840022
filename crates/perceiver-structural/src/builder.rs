//! Pure construction of the cleaned accessibility forest.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::model::{AccessibilityNode, TreeResult};

/// Leaf roles that carry nothing for the model when unnamed.
const DROPPABLE_LEAF_ROLES: &[&str] = &["none", "generic", "InlineTextBox"];
const SCROLLABLE_ROLE: &str = "Scrollable";

/// Converts a flat node list into a cleaned hierarchy plus its rendering.
#[derive(Clone, Debug, Default)]
pub struct AccessibilityTreeBuilder {
    prune_redundant_text: bool,
}

impl AccessibilityTreeBuilder {
    pub fn new() -> Self {
        Self {
            prune_redundant_text: true,
        }
    }

    /// Keep `StaticText` children even when they only repeat the parent's name.
    pub fn keep_redundant_text(mut self) -> Self {
        self.prune_redundant_text = false;
        self
    }

    pub fn build(&self, nodes: Vec<AccessibilityNode>) -> TreeResult {
        let input_len = nodes.len();

        // filter
        let retained: Vec<AccessibilityNode> = nodes
            .into_iter()
            .filter(|node| !node.has_negative_id() && !is_droppable_leaf(node))
            .collect();

        let iframes = retained
            .iter()
            .filter(|node| node.role == "Iframe")
            .cloned()
            .collect();

        // link
        let ids: HashSet<&str> = retained.iter().map(|n| n.node_id.as_str()).collect();
        let mut children_of: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();
        for (idx, node) in retained.iter().enumerate() {
            match node.parent_id.as_deref().filter(|p| ids.contains(p)) {
                Some(parent) => children_of.entry(parent).or_default().push(idx),
                None => roots.push(idx),
            }
        }

        // root + clean
        let mut visiting = HashSet::new();
        let mut tree = Vec::new();
        for idx in roots {
            let node = assemble(idx, &retained, &children_of, &mut visiting);
            if let Some(node) = self.clean(node) {
                tree.push(node);
            }
        }

        debug!(
            target: "a11y",
            input = input_len,
            retained = retained.len(),
            roots = tree.len(),
            "accessibility tree built"
        );

        let simplified = render_simplified(&tree);
        TreeResult {
            tree,
            simplified,
            iframes,
            id_to_url: Default::default(),
        }
    }

    fn clean(&self, mut node: AccessibilityNode) -> Option<AccessibilityNode> {
        if node.has_negative_id() {
            return None;
        }

        let mut children: Vec<AccessibilityNode> = node
            .children
            .take()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|child| self.clean(child))
            .collect();

        if node.is_structural() {
            return match children.len() {
                0 => None,
                1 => children.pop(),
                _ => {
                    node.children = Some(children);
                    Some(node)
                }
            };
        }

        if self.prune_redundant_text {
            children = remove_redundant_static_text(&node, children);
        }
        node.children = (!children.is_empty()).then_some(children);
        Some(node)
    }
}

fn is_droppable_leaf(node: &AccessibilityNode) -> bool {
    let childless = node.child_ids.as_ref().map_or(true, Vec::is_empty);
    !node.has_name() && childless && DROPPABLE_LEAF_ROLES.contains(&node.role.as_str())
}

fn assemble(
    idx: usize,
    retained: &[AccessibilityNode],
    children_of: &HashMap<&str, Vec<usize>>,
    visiting: &mut HashSet<usize>,
) -> AccessibilityNode {
    let mut node = retained[idx].clone();
    if !visiting.insert(idx) {
        // parentId cycle; cut it here
        node.children = None;
        return node;
    }
    let children: Vec<AccessibilityNode> = children_of
        .get(node.node_id.as_str())
        .map(|indices| {
            indices
                .iter()
                .map(|&child| assemble(child, retained, children_of, visiting))
                .collect()
        })
        .unwrap_or_default();
    node.children = (!children.is_empty()).then_some(children);
    node
}

fn normalize_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drops named `StaticText` children whose concatenated text equals the parent's name.
fn remove_redundant_static_text(
    parent: &AccessibilityNode,
    children: Vec<AccessibilityNode>,
) -> Vec<AccessibilityNode> {
    let Some(target) = parent
        .name
        .as_deref()
        .map(normalize_whitespace)
        .filter(|name| !name.is_empty())
    else {
        return children;
    };

    let is_text_leaf =
        |child: &AccessibilityNode| child.role == "StaticText" && child.children().is_empty();

    let combined: String = children
        .iter()
        .filter(|child| is_text_leaf(*child))
        .filter_map(|child| child.name.as_deref())
        .map(normalize_whitespace)
        .collect();

    if combined != target {
        return children;
    }
    children
        .into_iter()
        .filter(|child| !(is_text_leaf(child) && child.has_name()))
        .collect()
}

/// Prefixes the role of every node whose backend id is in `scrollable`.
pub fn mark_scrollables(nodes: &mut [AccessibilityNode], scrollable: &HashSet<i64>) {
    if scrollable.is_empty() {
        return;
    }
    for node in nodes.iter_mut() {
        let Some(backend_id) = node.backend_dom_node_id else {
            continue;
        };
        if !scrollable.contains(&backend_id) {
            continue;
        }
        node.role = if node.role.is_empty() || node.is_structural() {
            SCROLLABLE_ROLE.to_string()
        } else {
            format!("{SCROLLABLE_ROLE}, {}", node.role)
        };
    }
}

/// Renders `[nodeId] role: name` lines, two spaces of indent per level.
pub fn render_simplified(tree: &[AccessibilityNode]) -> String {
    let mut out = String::new();
    for node in tree {
        render_node(node, 0, &mut out);
    }
    out
}

fn render_node(node: &AccessibilityNode, level: usize, out: &mut String) {
    out.push_str(&"  ".repeat(level));
    out.push('[');
    out.push_str(&node.node_id);
    out.push_str("] ");
    out.push_str(&node.role);
    if let Some(name) = node.name.as_deref().filter(|name| !name.is_empty()) {
        out.push_str(": ");
        out.push_str(name);
    }
    out.push('\n');
    for child in node.children() {
        render_node(child, level + 1, out);
    }
}

/// Depth-first lookup by node id in a built tree.
pub fn find_node<'a>(tree: &'a [AccessibilityNode], node_id: &str) -> Option<&'a AccessibilityNode> {
    tree.iter().find_map(|node| {
        if node.node_id == node_id {
            Some(node)
        } else {
            find_node(node.children(), node_id)
        }
    })
}

pub(crate) fn walk_mut(tree: &mut [AccessibilityNode], f: &mut impl FnMut(&mut AccessibilityNode)) {
    for node in tree.iter_mut() {
        f(node);
        if let Some(children) = node.children.as_mut() {
            walk_mut(children, f);
        }
    }
}

pub(crate) fn walk(tree: &[AccessibilityNode], f: &mut impl FnMut(&AccessibilityNode)) {
    for node in tree {
        f(node);
        walk(node.children(), f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, role: &str, parent: Option<&str>) -> AccessibilityNode {
        let node = AccessibilityNode::new(id, role);
        match parent {
            Some(parent) => node.with_parent(parent),
            None => node,
        }
    }

    fn all_nodes(tree: &[AccessibilityNode]) -> Vec<&AccessibilityNode> {
        let mut out = Vec::new();
        fn collect<'a>(nodes: &'a [AccessibilityNode], out: &mut Vec<&'a AccessibilityNode>) {
            for n in nodes {
                out.push(n);
                collect(n.children(), out);
            }
        }
        collect(tree, &mut out);
        out
    }

    #[test]
    fn test_negative_ids_and_empty_generics_never_survive() {
        let nodes = vec![
            node("1", "RootWebArea", None)
                .with_name("Home")
                .with_child_ids(["-5", "2", "4"]),
            node("-5", "generic", Some("1")).with_child_ids(["3"]),
            node("3", "button", Some("-5")).with_name("Orphaned"),
            node("2", "generic", Some("1")).with_child_ids(["9"]),
            node("9", "InlineTextBox", Some("2")),
            node("4", "none", Some("1")).with_child_ids(["10"]),
        ];

        let result = AccessibilityTreeBuilder::new().build(nodes);
        for n in all_nodes(&result.tree) {
            assert!(!n.has_negative_id(), "negative id {} survived", n.node_id);
            if n.is_structural() {
                assert!(!n.children().is_empty(), "empty {} survived", n.node_id);
            }
        }
        // orphan of a dropped parent becomes a root
        assert!(result.tree.iter().any(|n| n.node_id == "3"));
    }

    #[test]
    fn test_generic_with_single_child_collapses() {
        let button = node("3", "button", Some("2")).with_name("Submit");
        let nodes = vec![
            node("1", "main", None).with_child_ids(["2"]),
            node("2", "generic", Some("1")).with_child_ids(["3"]),
            button.clone(),
        ];

        let result = AccessibilityTreeBuilder::new().build(nodes);
        let main = &result.tree[0];
        assert_eq!(main.children().len(), 1);
        assert_eq!(main.children()[0], button);
    }

    #[test]
    fn test_generic_with_many_children_is_kept() {
        let nodes = vec![
            node("2", "generic", None).with_child_ids(["3", "4"]),
            node("3", "link", Some("2")).with_name("A"),
            node("4", "link", Some("2")).with_name("B"),
        ];
        let result = AccessibilityTreeBuilder::new().build(nodes);
        assert_eq!(result.tree[0].role, "generic");
        assert_eq!(result.tree[0].children().len(), 2);
    }

    #[test]
    fn test_render_format() {
        let nodes = vec![
            node("1", "RootWebArea", None).with_name("Shop").with_child_ids(["2", "3"]),
            node("2", "heading", Some("1")).with_name("Cart"),
            node("3", "button", Some("1")).with_name(""),
        ];
        let result = AccessibilityTreeBuilder::new().build(nodes);
        assert_eq!(
            result.simplified,
            "[1] RootWebArea: Shop\n  [2] heading: Cart\n  [3] button\n"
        );
    }

    #[test]
    fn test_rendering_is_regenerable_from_tree() {
        let nodes = vec![
            node("1", "RootWebArea", None).with_name("Docs").with_child_ids(["2"]),
            node("2", "generic", Some("1")).with_child_ids(["3", "4"]),
            node("3", "link", Some("2")).with_name("Intro"),
            node("4", "link", Some("2")).with_name("Setup"),
        ];
        let result = AccessibilityTreeBuilder::new().build(nodes);
        let again = render_simplified(&result.tree);
        assert_eq!(again, result.simplified);
        assert_eq!(render_simplified(&result.tree), again);
    }

    #[test]
    fn test_redundant_static_text_is_pruned() {
        let nodes = vec![
            node("1", "link", None).with_name("Sign  in").with_child_ids(["2"]),
            node("2", "StaticText", Some("1")).with_name("Sign in"),
            node("3", "button", None).with_name("Buy").with_child_ids(["4"]),
            node("4", "StaticText", Some("3")).with_name("Buy now"),
        ];
        let result = AccessibilityTreeBuilder::new().build(nodes.clone());
        assert!(result.tree[0].children().is_empty());
        assert_eq!(result.tree[1].children().len(), 1);

        let kept = AccessibilityTreeBuilder::new().keep_redundant_text().build(nodes);
        assert_eq!(kept.tree[0].children().len(), 1);
    }

    #[test]
    fn test_scrollable_prefix() {
        let mut nodes = vec![
            node("1", "list", None).with_backend_id(10),
            node("2", "generic", None).with_backend_id(11),
            node("3", "button", None).with_backend_id(12),
        ];
        mark_scrollables(&mut nodes, &HashSet::from([10, 11]));
        assert_eq!(nodes[0].role, "Scrollable, list");
        assert_eq!(nodes[1].role, "Scrollable");
        assert_eq!(nodes[2].role, "button");
    }

    #[test]
    fn test_iframes_and_lookup() {
        let nodes = vec![
            node("1", "RootWebArea", None).with_child_ids(["2"]),
            node("2", "Iframe", Some("1")).with_name("ads"),
        ];
        let result = AccessibilityTreeBuilder::new().build(nodes);
        assert_eq!(result.iframes.len(), 1);
        assert_eq!(find_node(&result.tree, "2").map(|n| n.role.as_str()), Some("Iframe"));
        assert!(find_node(&result.tree, "99").is_none());
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let nodes = vec![
            node("1", "group", Some("2")).with_name("a"),
            node("2", "group", Some("1")).with_name("b"),
        ];
        let result = AccessibilityTreeBuilder::new().build(nodes);
        assert!(result.tree.is_empty());
    }
}
