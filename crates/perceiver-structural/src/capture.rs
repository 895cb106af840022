//! Scoped accessibility capture against a live page.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use cdp_adapter::{AdapterError, PageDriver};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::builder::{mark_scrollables, render_simplified, walk, walk_mut, AccessibilityTreeBuilder};
use crate::errors::PerceiverError;
use crate::model::{flatten_raw_nodes, AccessibilityNode, RawAxNode, TreeResult};
use crate::scripts::{
    xpath_lookup_expression, NODE_PATH_FUNCTION, SCROLLABLE_XPATHS_EXPRESSION, TAG_NAME_FUNCTION,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceiverOptions {
    /// Replace empty/generic/none roles of surviving nodes with their tag name.
    pub resolve_generic_roles: bool,
    pub compute_xpaths: bool,
    pub detect_scrollables: bool,
}

impl Default for PerceiverOptions {
    fn default() -> Self {
        Self {
            resolve_generic_roles: true,
            compute_xpaths: true,
            detect_scrollables: true,
        }
    }
}

/// Captures and normalises the accessibility tree of one page.
pub struct StructuralPerceiver<D: PageDriver> {
    driver: Arc<D>,
    builder: AccessibilityTreeBuilder,
    options: PerceiverOptions,
}

impl<D: PageDriver> StructuralPerceiver<D> {
    pub fn new(driver: Arc<D>) -> Self {
        Self {
            driver,
            builder: AccessibilityTreeBuilder::new(),
            options: PerceiverOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PerceiverOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_builder(mut self, builder: AccessibilityTreeBuilder) -> Self {
        self.builder = builder;
        self
    }

    /// Captures the tree. The Accessibility domain is disabled again on every path.
    pub async fn accessibility_tree(&self) -> Result<TreeResult, PerceiverError> {
        let started = Instant::now();
        let scrollable = if self.options.detect_scrollables {
            find_scrollable_backend_ids(self.driver.as_ref()).await
        } else {
            HashSet::new()
        };

        self.driver.enable_domain("Accessibility").await?;
        let captured = self.capture(&scrollable).await;
        if let Err(err) = self.driver.disable_domain("Accessibility").await {
            warn!(target: "a11y", %err, "failed to disable Accessibility domain");
        }

        let result = captured?;
        info!(
            target: "a11y",
            roots = result.tree.len(),
            scrollables = scrollable.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "accessibility tree captured"
        );
        Ok(result)
    }

    async fn capture(&self, scrollable: &HashSet<i64>) -> Result<TreeResult, PerceiverError> {
        let response = self
            .driver
            .send("Accessibility.getFullAXTree", json!({}))
            .await?;
        let raw_nodes = response
            .get("nodes")
            .cloned()
            .ok_or_else(|| PerceiverError::MalformedSnapshot("missing 'nodes'".into()))?;
        let raw: Vec<RawAxNode> = serde_json::from_value(raw_nodes)
            .map_err(|err| PerceiverError::MalformedSnapshot(err.to_string()))?;

        let (mut nodes, id_to_url) = flatten_raw_nodes(raw);
        mark_scrollables(&mut nodes, scrollable);

        let mut result = self.builder.build(nodes);
        result.id_to_url = id_to_url;
        self.enrich(&mut result.tree).await;
        result.simplified = render_simplified(&result.tree);
        Ok(result)
    }

    /// Best-effort role and XPath enrichment of surviving nodes.
    async fn enrich(&self, tree: &mut [AccessibilityNode]) {
        let mut role_targets = Vec::new();
        let mut xpath_targets = Vec::new();
        walk(tree, &mut |node: &AccessibilityNode| {
            let Some(backend_id) = node.backend_dom_node_id else {
                return;
            };
            if self.options.resolve_generic_roles && (node.role.is_empty() || node.is_structural())
            {
                role_targets.push(backend_id);
            }
            if self.options.compute_xpaths {
                xpath_targets.push(backend_id);
            }
        });

        let mut tags = HashMap::new();
        for backend_id in role_targets {
            match tag_name_for_backend_node(self.driver.as_ref(), backend_id).await {
                Ok(Some(tag)) => {
                    tags.insert(backend_id, tag);
                }
                Ok(None) => {}
                Err(err) => debug!(target: "a11y", backend_id, %err, "tag name lookup failed"),
            }
        }

        let mut xpaths = HashMap::new();
        for backend_id in xpath_targets {
            match xpath_for_backend_node(self.driver.as_ref(), backend_id).await {
                Ok(Some(xpath)) => {
                    xpaths.insert(backend_id, xpath);
                }
                Ok(None) => {}
                Err(err) => debug!(target: "a11y", backend_id, %err, "xpath lookup failed"),
            }
        }

        walk_mut(tree, &mut |node: &mut AccessibilityNode| {
            let Some(backend_id) = node.backend_dom_node_id else {
                return;
            };
            if let Some(tag) = tags.get(&backend_id) {
                node.role = tag.clone();
            }
            if let Some(xpath) = xpaths.get(&backend_id) {
                node.xpath = Some(xpath.clone());
            }
        });
    }
}

/// Lowercase tag name of the element behind a backend node id.
pub async fn tag_name_for_backend_node<D: PageDriver + ?Sized>(
    driver: &D,
    backend_id: i64,
) -> Result<Option<String>, AdapterError> {
    let Some(object_id) = driver.resolve_node(backend_id).await? else {
        return Ok(None);
    };
    let value = driver
        .call_function_on(&object_id, TAG_NAME_FUNCTION, Vec::new())
        .await?;
    Ok(value
        .as_str()
        .filter(|tag| !tag.is_empty())
        .map(str::to_string))
}

/// Absolute XPath of the node behind a backend node id.
pub async fn xpath_for_backend_node<D: PageDriver + ?Sized>(
    driver: &D,
    backend_id: i64,
) -> Result<Option<String>, AdapterError> {
    let Some(object_id) = driver.resolve_node(backend_id).await? else {
        return Ok(None);
    };
    let value = driver
        .call_function_on(&object_id, NODE_PATH_FUNCTION, Vec::new())
        .await?;
    Ok(value
        .as_str()
        .filter(|path| !path.is_empty())
        .map(str::to_string))
}

/// Backend ids of scrollable containers. Failures yield an empty or partial set.
pub async fn find_scrollable_backend_ids<D: PageDriver + ?Sized>(driver: &D) -> HashSet<i64> {
    let mut ids = HashSet::new();
    let xpaths: Vec<String> = match driver.evaluate(SCROLLABLE_XPATHS_EXPRESSION).await {
        Ok(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        Ok(other) => {
            debug!(target: "a11y", result = %other, "scrollable scan did not return a list");
            return ids;
        }
        Err(err) => {
            debug!(target: "a11y", %err, "scrollable scan failed");
            return ids;
        }
    };

    for xpath in xpaths.iter().filter(|xpath| !xpath.is_empty()) {
        match backend_id_for_xpath(driver, xpath).await {
            Ok(Some(id)) => {
                ids.insert(id);
            }
            Ok(None) => {}
            Err(err) => debug!(target: "a11y", %xpath, %err, "scrollable lookup failed"),
        }
    }
    ids
}

async fn backend_id_for_xpath<D: PageDriver + ?Sized>(
    driver: &D,
    xpath: &str,
) -> Result<Option<i64>, AdapterError> {
    let expression = xpath_lookup_expression(xpath)
        .map_err(|err| AdapterError::internal(err.to_string()))?;
    let Some(object_id) = driver.evaluate_handle(&expression).await? else {
        return Ok(None);
    };
    let node = driver.describe_node(&object_id).await?;
    Ok(node.get("backendNodeId").and_then(Value::as_i64))
}
