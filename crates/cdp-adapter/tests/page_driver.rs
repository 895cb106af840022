//! Exercises `CdpBrowser`/`CdpPage` over a scripted transport.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cdp_adapter::{
    AdapterError, AdapterErrorKind, CdpBrowser, CdpTransport, CommandTarget, PageDriver,
    TransportEvent,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

struct ScriptedTransport {
    sent: Mutex<Vec<(CommandTarget, String, Value)>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: AsyncMutex<mpsc::UnboundedReceiver<TransportEvent>>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            events_tx,
            events_rx: AsyncMutex::new(events_rx),
        })
    }

    fn emit(&self, method: &str, params: Value, session_id: Option<&str>) {
        self.events_tx
            .send(TransportEvent {
                method: method.to_string(),
                params,
                session_id: session_id.map(str::to_string),
            })
            .unwrap();
    }

    fn methods(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, m, _)| m.clone()).collect()
    }
}

#[async_trait]
impl CdpTransport for ScriptedTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events_rx.lock().await.recv().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        self.sent
            .lock()
            .push((target, method.to_string(), params.clone()));
        match method {
            "Target.createTarget" => Ok(json!({ "targetId": "T1" })),
            "Target.attachToTarget" => Ok(json!({ "sessionId": "S1" })),
            "Runtime.evaluate" => match params["expression"].as_str() {
                Some("window.location.href") => {
                    Ok(json!({ "result": { "type": "string", "value": "https://example.test/" } }))
                }
                Some("boom()") => Ok(json!({
                    "result": { "type": "object" },
                    "exceptionDetails": { "text": "Uncaught ReferenceError: boom is not defined" }
                })),
                _ => Ok(json!({ "result": { "type": "undefined" } })),
            },
            "Page.getNavigationHistory" => Ok(json!({
                "currentIndex": 1,
                "entries": [
                    { "id": 10, "url": "https://a.test/" },
                    { "id": 11, "url": "https://b.test/" }
                ]
            })),
            "Page.captureScreenshot" => Ok(json!({ "data": "iVBORw0K" })),
            "Page.navigate" if params["url"] == "https://down.test/" => {
                Ok(json!({ "frameId": "F", "errorText": "net::ERR_NAME_NOT_RESOLVED" }))
            }
            _ => Ok(json!({})),
        }
    }
}

#[tokio::test]
async fn test_new_page_attaches_and_enables_domains() {
    let transport = ScriptedTransport::new();
    let browser = CdpBrowser::connect(transport.clone()).await.unwrap();
    let page = browser.new_page("https://example.test/").await.unwrap();

    assert_eq!(page.target_id(), "T1");
    assert_eq!(page.session_id(), "S1");
    assert_eq!(
        transport.methods(),
        vec![
            "Target.createTarget",
            "Target.attachToTarget",
            "Page.enable",
            "Runtime.enable",
            "DOM.enable",
            "Network.enable",
            "Page.navigate",
        ]
    );
    let sent = transport.sent.lock();
    assert_eq!(sent[2].0, CommandTarget::Session("S1".into()));
    assert_eq!(sent[0].0, CommandTarget::Browser);
}

#[tokio::test]
async fn test_helpers_map_protocol_responses() {
    let transport = ScriptedTransport::new();
    let browser = CdpBrowser::connect(transport.clone()).await.unwrap();
    let page = browser.attach("T1").await.unwrap();

    assert_eq!(page.current_url().await.unwrap(), "https://example.test/");

    let err = page.evaluate("boom()").await.unwrap_err();
    assert_eq!(err.kind, AdapterErrorKind::Script);

    assert!(page.history_step(-1).await.unwrap());
    assert!(!page.history_step(1).await.unwrap());
    let sent = transport.sent.lock().clone();
    let entry = sent
        .iter()
        .find(|(_, method, _)| method == "Page.navigateToHistoryEntry")
        .expect("history navigation sent");
    assert_eq!(entry.2["entryId"], 10);

    let png = page.screenshot().await.unwrap();
    assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);

    let err = page.navigate("https://down.test/").await.unwrap_err();
    assert_eq!(err.kind, AdapterErrorKind::CdpIo);
}

#[tokio::test]
async fn test_events_are_routed_by_session() {
    let transport = ScriptedTransport::new();
    let browser = CdpBrowser::connect(transport.clone()).await.unwrap();
    let page = browser.attach("T1").await.unwrap();
    let mut events = page.events();

    transport.emit("Page.loadEventFired", json!({}), Some("OTHER"));
    transport.emit("Target.targetCreated", json!({ "targetInfo": { "targetId": "T2" } }), None);
    transport.emit("Network.requestWillBeSent", json!({ "requestId": "r1" }), Some("S1"));

    let first = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.method, "Target.targetCreated");
    let second = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.method, "Network.requestWillBeSent");
    assert_eq!(page.network().inflight(), 1);
}
