use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, Response};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

/// Flags every launched browser gets; keeps background work from stealing
/// network activity the idle tracker would count.
const LAUNCH_FLAGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-component-update",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-popup-blocking",
    "--disable-sync",
    "--no-first-run",
    "--no-default-browser-check",
    "--remote-allow-origins=*",
];
const HEADLESS_FLAGS: &[&str] = &["--headless=new", "--hide-scrollbars", "--mute-audio"];
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
const EVENT_BUFFER: usize = 1024;

/// Protocol event as delivered by the connection. `session_id` is `None` for
/// browser-level events (target discovery and the like).
#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

/// Where a command is delivered: the browser endpoint or one attached page session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Raw DevTools channel shared by the browser and all of its pages.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    /// Connects and turns on target discovery. Called once by [`crate::CdpBrowser`].
    async fn start(&self) -> Result<(), AdapterError>;
    /// Next event from any session; `None` once the connection is gone.
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

/// Transport with nothing behind it; every command fails.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, AdapterError> {
        Err(AdapterError::internal(format!("no transport for {method}")))
    }
}

/// Transport over a chromiumoxide connection to a launched or running browser.
///
/// The connection is opened on first use and lives as long as the transport;
/// once it drops, commands fail with `CdpIo` and the event stream ends.
pub struct ChromiumTransport {
    config: CdpConfig,
    link: OnceCell<Link>,
}

impl ChromiumTransport {
    pub fn new(config: CdpConfig) -> Self {
        Self {
            config,
            link: OnceCell::new(),
        }
    }

    async fn link(&self) -> Result<&Link, AdapterError> {
        self.link.get_or_try_init(|| Link::open(&self.config)).await
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        self.send_command(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
        )
        .await
        .map(|_| ())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let link = self.link.get()?;
        link.events.lock().await.recv().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let link = self.link().await?;
        let (reply, response) = oneshot::channel();
        link.outbox
            .send(Outgoing {
                session: match target {
                    CommandTarget::Browser => None,
                    CommandTarget::Session(id) => Some(id),
                },
                method: method.to_string(),
                params,
                reply,
            })
            .map_err(|_| connection_closed(method))?;

        match tokio::time::timeout(self.config.command_timeout(), response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(connection_closed(method)),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::NavTimeout)
                .with_hint(format!("{method} got no reply within {:?}", self.config.command_timeout()))
                .retriable(true)),
        }
    }
}

struct Outgoing {
    session: Option<String>,
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Value, AdapterError>>,
}

/// Live connection: the command outbox, the event inbox and the browser process
/// when this transport launched it.
struct Link {
    outbox: mpsc::UnboundedSender<Outgoing>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    _process: Option<BrowserProcess>,
    pump: tokio::task::JoinHandle<()>,
}

impl Link {
    async fn open(config: &CdpConfig) -> Result<Self, AdapterError> {
        let (process, ws_url) = match &config.websocket_url {
            Some(url) => (None, url.clone()),
            None => {
                let child = launch_config(config)?
                    .launch()
                    .map_err(|err| AdapterError::internal(format!("launching chromium: {err}")))?;
                // Owned before the handshake so a failed start still kills the process.
                let mut process = BrowserProcess::new(child);
                let url = process.devtools_url().await?;
                (Some(process), url)
            }
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| {
                AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("connecting to {ws_url}: {err}"))
            })?;
        info!(target: "cdp-transport", url = %ws_url, launched = process.is_some(), "connected to browser");

        let (outbox, commands) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::channel(EVENT_BUFFER);
        let pump = tokio::spawn(
            Pump {
                conn,
                commands,
                event_tx,
                pending: HashMap::new(),
            }
            .run(),
        );

        Ok(Self {
            outbox,
            events: Mutex::new(events),
            _process: process,
            pump,
        })
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

struct BrowserProcess(parking_lot::Mutex<Option<Child>>);

impl BrowserProcess {
    fn new(child: Child) -> Self {
        Self(parking_lot::Mutex::new(Some(child)))
    }

    async fn devtools_url(&mut self) -> Result<String, AdapterError> {
        let child = self
            .0
            .get_mut()
            .as_mut()
            .ok_or_else(|| AdapterError::internal("browser process already stopped"))?;
        extract_ws_url(child)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        let Some(mut child) = self.0.get_mut().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = child.kill().await {
                        warn!(target: "cdp-transport", %err, "chromium did not exit");
                    }
                });
            }
            Err(_) => debug!(target: "cdp-transport", "no runtime left to stop chromium"),
        }
    }
}

struct InFlight {
    method: String,
    reply: oneshot::Sender<Result<Value, AdapterError>>,
}

/// Single task owning the connection: submits queued commands, matches replies
/// to their callers and forwards events.
struct Pump {
    conn: Connection<CdpEventMessage>,
    commands: mpsc::UnboundedReceiver<Outgoing>,
    event_tx: mpsc::Sender<TransportEvent>,
    pending: HashMap<CallId, InFlight>,
}

impl Pump {
    async fn run(mut self) {
        let reason = loop {
            tokio::select! {
                Some(cmd) = self.commands.recv() => self.submit(cmd),
                message = self.conn.next() => match message {
                    Some(Ok(Message::Response(resp))) => self.settle(resp),
                    Some(Ok(Message::Event(event))) => self.forward(event).await,
                    Some(Err(err)) => break connection_error(err),
                    None => break AdapterError::new(AdapterErrorKind::CdpIo)
                        .with_hint("browser closed the connection"),
                },
            }
        };
        warn!(target: "cdp-transport", error = %reason, pending = self.pending.len(), "connection lost");
        for (_, inflight) in self.pending.drain() {
            let _ = inflight.reply.send(Err(reason.clone()));
        }
    }

    fn submit(&mut self, cmd: Outgoing) {
        debug!(target: "cdp-transport", method = %cmd.method, session = ?cmd.session, "send");
        let session = cmd.session.map(CdpSessionId::from);
        match self
            .conn
            .submit_command(cmd.method.clone().into(), session, cmd.params)
        {
            Ok(id) => {
                self.pending.insert(
                    id,
                    InFlight {
                        method: cmd.method,
                        reply: cmd.reply,
                    },
                );
            }
            Err(err) => {
                let _ = cmd.reply.send(Err(AdapterError::new(AdapterErrorKind::CdpIo)
                    .with_hint(format!("{}: {err}", cmd.method))));
            }
        }
    }

    fn settle(&mut self, resp: Response) {
        match self.pending.remove(&resp.id) {
            Some(inflight) => {
                let _ = inflight.reply.send(reply_result(&inflight.method, resp));
            }
            None => debug!(target: "cdp-transport", id = ?resp.id, "reply for unknown call"),
        }
    }

    async fn forward(&mut self, event: CdpEventMessage) {
        let raw: CdpJsonEventMessage = match event.try_into() {
            Ok(raw) => raw,
            Err(err) => {
                warn!(target: "cdp-transport", %err, "undecodable event");
                return;
            }
        };
        let event = TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        };
        if self.event_tx.send(event).await.is_err() {
            debug!(target: "cdp-transport", "event receiver gone");
        }
    }
}

/// Protocol errors at or above 500 are server-side and worth retrying.
fn reply_result(method: &str, resp: Response) -> Result<Value, AdapterError> {
    match (resp.result, resp.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("{method} failed ({}): {}", error.code, error.message))
            .retriable(error.code >= 500)),
        (None, None) => Err(AdapterError::internal(format!("{method}: empty reply"))),
    }
}

fn connection_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::NavTimeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::Serde(_) => AdapterError::internal(hint),
        _ => AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

fn connection_closed(method: &str) -> AdapterError {
    AdapterError::new(AdapterErrorKind::CdpIo).with_hint(format!("{method}: connection closed"))
}

fn launch_args(config: &CdpConfig) -> Vec<String> {
    let mut args: Vec<String> = LAUNCH_FLAGS.iter().map(|flag| flag.to_string()).collect();
    if config.headless {
        args.extend(HEADLESS_FLAGS.iter().map(|flag| flag.to_string()));
    }
    args.extend(config.extra_args.iter().cloned());
    args
}

fn launch_config(config: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if !config.executable.as_os_str().is_empty() && !config.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("no browser at {}", config.executable.display()))
            .with_data(json!({ "executable": config.executable })));
    }
    let profile = config.resolved_profile_dir().map_err(|err| {
        AdapterError::internal(format!("resolving profile dir: {err}"))
    })?;
    std::fs::create_dir_all(&profile).map_err(|err| {
        AdapterError::internal(format!("creating {}: {err}", profile.display()))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(config.command_timeout())
        .launch_timeout(LAUNCH_TIMEOUT)
        .window_size(config.viewport.width, config.viewport.height)
        .user_data_dir(profile)
        .args(launch_args(config));
    if !config.headless {
        builder = builder.with_head();
    }
    if config.disable_sandbox {
        builder = builder.no_sandbox();
    }
    if !config.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(config.executable.clone());
    }
    builder
        .build()
        .map_err(|err| AdapterError::internal(format!("browser config: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn response(body: Value) -> Response {
        serde_json::from_value(body).expect("response json")
    }

    #[test]
    fn test_reply_result_splits_success_and_protocol_errors() {
        let ok = reply_result("DOM.enable", response(json!({ "id": 1, "result": {} })));
        assert_eq!(ok.unwrap(), json!({}));

        let err = reply_result(
            "Target.attachToTarget",
            response(json!({
                "id": 2,
                "error": { "code": -32000, "message": "No target with given id found" }
            })),
        )
        .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(!err.retriable);
        let hint = err.hint.unwrap_or_default();
        assert!(hint.starts_with("Target.attachToTarget failed (-32000)"));
        assert!(hint.contains("No target"));

        let empty = reply_result("Page.enable", response(json!({ "id": 3 }))).unwrap_err();
        assert_eq!(empty.kind, AdapterErrorKind::Internal);
    }

    #[test]
    fn test_launch_args_follow_headless_and_extras() {
        let mut config = CdpConfig {
            headless: true,
            extra_args: vec!["--lang=en-US".to_string()],
            ..CdpConfig::default()
        };
        let args = launch_args(&config);
        assert!(args.iter().any(|arg| arg == "--headless=new"));
        assert_eq!(args.last().map(String::as_str), Some("--lang=en-US"));

        config.headless = false;
        assert!(!launch_args(&config).iter().any(|arg| arg.starts_with("--headless")));
    }

    #[tokio::test]
    async fn test_noop_transport_rejects_commands() {
        let transport = NoopTransport;
        let err = transport
            .send_command(CommandTarget::Browser, "Browser.getVersion", json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Internal);
        assert!(transport.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_events_end_before_connecting() {
        let transport = ChromiumTransport::new(CdpConfig::default());
        assert!(transport.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_executable_fails_before_launch() {
        let transport = ChromiumTransport::new(CdpConfig {
            executable: PathBuf::from("/nonexistent/waypoint-chrome"),
            websocket_url: None,
            ..CdpConfig::default()
        });
        let err = transport.start().await.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(err.hint.unwrap_or_default().contains("no browser at"));
    }
}
