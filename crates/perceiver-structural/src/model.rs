use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Roles that carry no semantics of their own and may be collapsed.
pub const STRUCTURAL_ROLES: &[&str] = &["generic", "none"];

/// One accessibility node. `children` is only populated in a built tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityNode {
    pub node_id: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(
        default,
        rename = "backendDOMNodeId",
        skip_serializing_if = "Option::is_none"
    )]
    pub backend_dom_node_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<AccessibilityNode>>,
}

impl AccessibilityNode {
    pub fn new(node_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_child_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.child_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_backend_id(mut self, backend_id: i64) -> Self {
        self.backend_dom_node_id = Some(backend_id);
        self
    }

    /// True when the id parses as a negative integer (pseudo nodes).
    pub fn has_negative_id(&self) -> bool {
        self.node_id.parse::<i64>().map(|id| id < 0).unwrap_or(false)
    }

    pub fn is_structural(&self) -> bool {
        STRUCTURAL_ROLES.contains(&self.role.as_str())
    }

    pub fn has_name(&self) -> bool {
        self.name.as_deref().is_some_and(|name| !name.trim().is_empty())
    }

    pub fn children(&self) -> &[AccessibilityNode] {
        self.children.as_deref().unwrap_or(&[])
    }
}

/// Result of one build: the cleaned forest and its textual rendering.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeResult {
    pub tree: Vec<AccessibilityNode>,
    pub simplified: String,
    #[serde(default)]
    pub iframes: Vec<AccessibilityNode>,
    #[serde(default)]
    pub id_to_url: BTreeMap<String, String>,
}

/// Typed value as it appears in `Accessibility.getFullAXTree`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AxValue {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub value: Option<Value>,
}

impl AxValue {
    pub fn as_text(&self) -> Option<String> {
        match self.value.as_ref()? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AxProperty {
    pub name: String,
    #[serde(default)]
    pub value: Option<AxValue>,
}

/// Node shape returned by the remote-debugging protocol.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAxNode {
    pub node_id: String,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub role: Option<AxValue>,
    #[serde(default)]
    pub name: Option<AxValue>,
    #[serde(default)]
    pub description: Option<AxValue>,
    #[serde(default)]
    pub value: Option<AxValue>,
    #[serde(default)]
    pub properties: Option<Vec<AxProperty>>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub child_ids: Option<Vec<String>>,
    #[serde(default, rename = "backendDOMNodeId")]
    pub backend_dom_node_id: Option<i64>,
}

impl RawAxNode {
    fn url(&self) -> Option<String> {
        self.properties
            .as_ref()?
            .iter()
            .find(|prop| prop.name == "url")
            .and_then(|prop| prop.value.as_ref())
            .and_then(AxValue::as_text)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
    }

    pub fn into_node(self) -> AccessibilityNode {
        AccessibilityNode {
            role: self.role.as_ref().and_then(AxValue::as_text).unwrap_or_default(),
            name: self.name.as_ref().and_then(AxValue::as_text),
            description: self.description.as_ref().and_then(AxValue::as_text),
            value: self.value.as_ref().and_then(AxValue::as_text),
            backend_dom_node_id: self.backend_dom_node_id,
            parent_id: self.parent_id,
            child_ids: self.child_ids,
            xpath: None,
            children: None,
            node_id: self.node_id,
        }
    }
}

/// Converts protocol nodes into flat [`AccessibilityNode`]s, collecting link targets.
pub fn flatten_raw_nodes(raw: Vec<RawAxNode>) -> (Vec<AccessibilityNode>, BTreeMap<String, String>) {
    let mut id_to_url = BTreeMap::new();
    let nodes = raw
        .into_iter()
        .map(|node| {
            if let Some(url) = node.url() {
                id_to_url.insert(node.node_id.clone(), url);
            }
            node.into_node()
        })
        .collect();
    (nodes, id_to_url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_node_conversion() {
        let raw: Vec<RawAxNode> = serde_json::from_value(json!([
            {
                "nodeId": "5",
                "ignored": false,
                "role": { "type": "role", "value": "link" },
                "name": { "type": "computedString", "value": "Docs" },
                "properties": [
                    { "name": "focusable", "value": { "type": "booleanOrUndefined", "value": true } },
                    { "name": "url", "value": { "type": "string", "value": " https://example.test/docs " } }
                ],
                "parentId": "1",
                "childIds": ["6"],
                "backendDOMNodeId": 42
            },
            { "nodeId": "6", "role": { "type": "role", "value": "StaticText" }, "value": { "type": "integer", "value": 3 } }
        ]))
        .unwrap();

        let (nodes, urls) = flatten_raw_nodes(raw);
        assert_eq!(nodes[0].role, "link");
        assert_eq!(nodes[0].name.as_deref(), Some("Docs"));
        assert_eq!(nodes[0].backend_dom_node_id, Some(42));
        assert_eq!(nodes[1].value.as_deref(), Some("3"));
        assert_eq!(urls.get("5").map(String::as_str), Some("https://example.test/docs"));
        assert_eq!(urls.len(), 1);
    }

    #[test]
    fn test_negative_id_detection() {
        assert!(AccessibilityNode::new("-1000", "generic").has_negative_id());
        assert!(!AccessibilityNode::new("12", "button").has_negative_id());
        assert!(!AccessibilityNode::new("frame-a", "button").has_negative_id());
    }
}
