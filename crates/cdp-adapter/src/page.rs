use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::driver::{PageDriver, PageEvent};
use crate::error::{AdapterError, AdapterErrorKind};
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

const ROUTER_CAPACITY: usize = 1024;
const PAGE_EVENT_CAPACITY: usize = 512;
const NETWORK_QUIET_WINDOW: Duration = Duration::from_millis(500);
const NETWORK_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the transport and fans its events out to attached pages.
pub struct CdpBrowser {
    transport: Arc<dyn CdpTransport>,
    router: broadcast::Sender<TransportEvent>,
    pump: JoinHandle<()>,
}

impl CdpBrowser {
    /// Launches (or connects to, when `websocket_url` is set) a Chromium instance.
    pub async fn launch(config: CdpConfig) -> Result<Arc<Self>, AdapterError> {
        Self::connect(Arc::new(ChromiumTransport::new(config))).await
    }

    pub async fn connect(transport: Arc<dyn CdpTransport>) -> Result<Arc<Self>, AdapterError> {
        transport.start().await?;

        let (router, _) = broadcast::channel(ROUTER_CAPACITY);
        let pump = {
            let transport = transport.clone();
            let router = router.clone();
            tokio::spawn(async move {
                while let Some(event) = transport.next_event().await {
                    // No subscribers is fine; pages come and go.
                    let _ = router.send(event);
                }
                debug!(target: "cdp-transport", "event stream ended");
            })
        };

        Ok(Arc::new(Self {
            transport,
            router,
            pump,
        }))
    }

    pub fn transport(&self) -> Arc<dyn CdpTransport> {
        self.transport.clone()
    }

    /// Opens a new tab, attaches to it, and navigates to `url`.
    pub async fn new_page(self: &Arc<Self>, url: &str) -> Result<CdpPage, AdapterError> {
        let created = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": "about:blank" }),
            )
            .await?;
        let target_id = created
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::missing_field("Target.createTarget", "targetId"))?
            .to_string();

        let page = self.attach(&target_id).await?;
        if url != "about:blank" {
            page.navigate(url).await?;
        }
        Ok(page)
    }

    /// Attaches a flattened session to an existing page target.
    pub async fn attach(self: &Arc<Self>, target_id: &str) -> Result<CdpPage, AdapterError> {
        let attached = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await
            .map_err(|err| {
                if err.hint.as_deref().is_some_and(|h| h.contains("No target")) {
                    AdapterError::new(AdapterErrorKind::TargetNotFound).with_hint(target_id)
                } else {
                    err
                }
            })?;
        let session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::missing_field("Target.attachToTarget", "sessionId"))?
            .to_string();

        let page = CdpPage::new(self.clone(), target_id.to_string(), session_id);
        for domain in ["Page", "Runtime", "DOM", "Network"] {
            page.enable_domain(domain).await?;
        }
        info!(target_id, "attached page session");
        Ok(page)
    }
}

impl Drop for CdpBrowser {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[derive(Debug)]
struct NetworkState {
    inflight: HashSet<String>,
    last_activity: Instant,
}

/// Counts in-flight requests from `Network.*` events.
#[derive(Debug)]
pub struct NetworkTracker {
    state: Mutex<NetworkState>,
}

impl Default for NetworkTracker {
    fn default() -> Self {
        Self {
            state: Mutex::new(NetworkState {
                inflight: HashSet::new(),
                last_activity: Instant::now(),
            }),
        }
    }
}

impl NetworkTracker {
    pub fn observe(&self, method: &str, params: &Value) {
        let Some(request_id) = params.get("requestId").and_then(Value::as_str) else {
            return;
        };
        let mut state = self.state.lock();
        match method {
            "Network.requestWillBeSent" => {
                state.inflight.insert(request_id.to_string());
            }
            "Network.loadingFinished" | "Network.loadingFailed" => {
                state.inflight.remove(request_id);
            }
            _ => return,
        }
        state.last_activity = Instant::now();
    }

    pub fn inflight(&self) -> usize {
        self.state.lock().inflight.len()
    }

    pub fn is_idle(&self, quiet: Duration) -> bool {
        let state = self.state.lock();
        state.inflight.is_empty() && state.last_activity.elapsed() >= quiet
    }

    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_idle(NETWORK_QUIET_WINDOW) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(NETWORK_POLL_INTERVAL).await;
        }
    }
}

/// A page target attached through a flattened session.
pub struct CdpPage {
    browser: Arc<CdpBrowser>,
    target_id: String,
    session_id: String,
    events: broadcast::Sender<PageEvent>,
    network: Arc<NetworkTracker>,
    forwarder: JoinHandle<()>,
}

impl CdpPage {
    fn new(browser: Arc<CdpBrowser>, target_id: String, session_id: String) -> Self {
        let (events, _) = broadcast::channel(PAGE_EVENT_CAPACITY);
        let network = Arc::new(NetworkTracker::default());

        let forwarder = {
            let mut rx = browser.router.subscribe();
            let events = events.clone();
            let network = network.clone();
            let session_id = session_id.clone();
            tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => {
                            let ours = match event.session_id.as_deref() {
                                Some(id) => id == session_id,
                                None => true,
                            };
                            if !ours {
                                continue;
                            }
                            network.observe(&event.method, &event.params);
                            let _ = events.send(PageEvent {
                                method: event.method,
                                params: event.params,
                            });
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(target: "cdp-transport", skipped, "page event forwarder lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        Self {
            browser,
            target_id,
            session_id,
            events,
            network,
            forwarder,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn network(&self) -> Arc<NetworkTracker> {
        self.network.clone()
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    fn target_id(&self) -> &str {
        &self.target_id
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.browser
            .transport
            .send_command(CommandTarget::Session(self.session_id.clone()), method, params)
            .await
    }

    async fn send_browser(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.browser
            .transport
            .send_command(CommandTarget::Browser, method, params)
            .await
    }

    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<bool, AdapterError> {
        Ok(self.network.wait_for_idle(timeout).await)
    }
}
