use std::sync::Arc;
use std::time::Duration;

use action_locator::{
    LocatorError, ScriptProbe, SelectorCandidate, SelectorProbe, SelectorSynthesizer,
    SelectorTier, TargetRef,
};
use async_trait::async_trait;
use cdp_adapter::{AdapterError, PageDriver, PageEvent};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;

/// Page that answers every evaluation from a queue of canned results.
struct CannedPage {
    expressions: Mutex<Vec<String>>,
    replies: Mutex<Vec<Value>>,
    events: broadcast::Sender<PageEvent>,
}

impl CannedPage {
    fn new(replies: Vec<Value>) -> Self {
        Self {
            expressions: Mutex::new(Vec::new()),
            replies: Mutex::new(replies.into_iter().rev().collect()),
            events: broadcast::channel(4).0,
        }
    }
}

#[async_trait]
impl PageDriver for CannedPage {
    fn target_id(&self) -> &str {
        "T1"
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        assert_eq!(method, "Runtime.evaluate");
        self.expressions
            .lock()
            .push(params["expression"].as_str().unwrap_or_default().to_string());
        let reply = self.replies.lock().pop().unwrap_or(Value::Null);
        Ok(json!({ "result": { "type": "object", "value": reply } }))
    }

    async fn send_browser(&self, _method: &str, _params: Value) -> Result<Value, AdapterError> {
        Ok(json!({}))
    }

    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<bool, AdapterError> {
        Ok(true)
    }
}

fn submit_descriptor() -> Value {
    json!({
        "tag": "button",
        "id": null,
        "attributes": { "data-testid": "submit", "type": "submit" },
        "classes": ["btn"],
        "text": "Sign in",
        "nthOfType": 1,
        "nthChild": 3,
        "ancestors": [
            { "tag": "form", "id": "login", "attributes": {}, "classes": [], "text": null, "nthOfType": 1, "nthChild": 1, "ancestors": [] },
            { "tag": "body", "id": null, "attributes": {}, "classes": [], "text": null, "nthOfType": 1, "nthChild": 2, "ancestors": [] },
            { "tag": "html", "id": null, "attributes": {}, "classes": [], "text": null, "nthOfType": 1, "nthChild": 1, "ancestors": [] }
        ]
    })
}

#[tokio::test]
async fn test_synthesis_round_trips_through_page_scripts() {
    let page = CannedPage::new(vec![
        submit_descriptor(),
        json!({ "matched": 0, "checked": 1, "timedOut": false }),
    ]);
    let synthesizer = SelectorSynthesizer::new(ScriptProbe::new(Arc::new(page)));

    let selected = synthesizer
        .selector_for_point(40.0, 12.0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(selected.selector, "[data-testid=\"submit\"]");
    assert_eq!(selected.tier, SelectorTier::TestAttribute);

    let expressions = synthesizer.probe().driver().expressions.lock().clone();
    assert_eq!(expressions.len(), 2);
    assert!(expressions[0].contains("return describe({"));
    assert!(expressions[0].contains("elementFromPoint"));
    assert!(expressions[1].contains("return verify({"));
    assert!(expressions[1].contains("ORDERED_NODE_SNAPSHOT_TYPE"));
}

#[tokio::test]
async fn test_in_page_timeout_yields_structural_path() {
    let page = CannedPage::new(vec![
        submit_descriptor(),
        json!({ "matched": null, "checked": 3, "timedOut": true }),
    ]);
    let synthesizer = SelectorSynthesizer::new(ScriptProbe::new(Arc::new(page)));

    let selected = synthesizer
        .selector_for_point(40.0, 12.0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(selected.selector, "body > form:nth-child(1) > button:nth-child(3)");
    assert_eq!(selected.tier, SelectorTier::StructuralPath);
    assert!(selected.timed_out);
    assert_eq!(selected.candidates_checked, 3);
}

#[tokio::test]
async fn test_null_description_means_no_target() {
    let probe = ScriptProbe::new(Arc::new(CannedPage::new(vec![Value::Null])));
    assert!(probe.describe(TargetRef::Focused).await.unwrap().is_none());
}

#[tokio::test]
async fn test_out_of_range_match_is_rejected() {
    let probe = ScriptProbe::new(Arc::new(CannedPage::new(vec![json!({
        "matched": 4,
        "checked": 5,
        "timedOut": false
    })])));
    let candidates = vec![SelectorCandidate::css("#save", SelectorTier::StableId)];
    let err = probe
        .first_unique(TargetRef::Focused, &candidates, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, LocatorError::MalformedProbe(_)));
}
