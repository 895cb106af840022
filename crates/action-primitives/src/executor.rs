//! Action executor
//!
//! Every action moves through the same phases: pre-screenshot, dispatch by type,
//! post-effect handling (new tabs, network idle, URL refresh), post-screenshot and
//! recording. Recording happens on failure too so partial sessions stay replayable.

use std::sync::Arc;
use std::time::Duration;

use action_locator::{LocatorConfig, ScriptProbe, SelectorSynthesizer};
use cdp_adapter::{MouseButton, PageDriver, PageEvent};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use waypoint_core_types::Point;

use crate::cursor::CursorOverlay;
use crate::errors::ActionError;
use crate::keys::{press_chord, split_chord, type_humanlike};
use crate::recorder::{ActionRecorder, RecordedAction, RecordedStep};
use crate::scripts;
use crate::types::{ActionOutcome, AgentAction, ElementMethod, ExecutorConfig, MethodCall};

/// Side effects observed while dispatching one action.
#[derive(Debug, Default)]
struct Effects {
    new_tab_url: Option<String>,
    scroll_target: Option<String>,
    screenshot: Option<Vec<u8>>,
}

impl Effects {
    fn scrolled(target: Option<String>) -> Self {
        Self {
            scroll_target: target,
            ..Default::default()
        }
    }
}

pub struct ActionExecutor<D: PageDriver + 'static> {
    driver: Arc<D>,
    synthesizer: SelectorSynthesizer<ScriptProbe<D>>,
    recorder: Arc<ActionRecorder>,
    config: ExecutorConfig,
    cursor: CursorOverlay,
    last_cursor: Mutex<Point>,
    current_url: Mutex<Option<String>>,
}

impl<D: PageDriver + 'static> ActionExecutor<D> {
    pub fn new(driver: Arc<D>, recorder: Arc<ActionRecorder>) -> Self {
        Self::with_config(
            driver,
            recorder,
            ExecutorConfig::default(),
            LocatorConfig::default(),
        )
    }

    pub fn with_config(
        driver: Arc<D>,
        recorder: Arc<ActionRecorder>,
        config: ExecutorConfig,
        locator: LocatorConfig,
    ) -> Self {
        let synthesizer =
            SelectorSynthesizer::with_config(ScriptProbe::new(Arc::clone(&driver)), locator);
        Self {
            cursor: CursorOverlay::new(config.show_cursor),
            driver,
            synthesizer,
            recorder,
            config,
            last_cursor: Mutex::new(Point::default()),
            current_url: Mutex::new(None),
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn recorder(&self) -> &Arc<ActionRecorder> {
        &self.recorder
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn synthesizer(&self) -> &SelectorSynthesizer<ScriptProbe<D>> {
        &self.synthesizer
    }

    /// Last URL observed after an action, without a page round-trip.
    pub fn current_url(&self) -> Option<String> {
        self.current_url.lock().clone()
    }

    pub fn cursor_position(&self) -> Point {
        *self.last_cursor.lock()
    }

    /// Re-reads `location.href`; keeps the cached value if the page cannot answer.
    pub async fn refresh_url(&self) -> Option<String> {
        match self.driver.current_url().await {
            Ok(url) => {
                *self.current_url.lock() = Some(url.clone());
                Some(url)
            }
            Err(err) => {
                debug!(error = %err, "could not refresh current url");
                self.current_url()
            }
        }
    }

    async fn known_url(&self) -> Option<String> {
        match self.current_url() {
            Some(url) => Some(url),
            None => self.refresh_url().await,
        }
    }

    /// Executes one agent action.
    pub async fn execute(&self, action: &AgentAction) -> Result<ActionOutcome, ActionError> {
        info!(action = action.kind(), "executing action");
        let screenshot_before = self.capture_screenshot().await;
        let url_before = self.known_url().await;
        let selector = self.selector_hint(action).await;

        let result = self.dispatch(action).await;
        let url_after = self.refresh_url().await;
        let screenshot_after = match &result {
            Ok(Effects {
                screenshot: Some(bytes),
                ..
            }) => Some(bytes.clone()),
            _ => self.capture_screenshot().await,
        };

        self.finish(
            RecordedStep::Agent(action.clone()),
            selector,
            result,
            url_before,
            url_after,
            screenshot_before,
            screenshot_after,
        )
    }

    /// Applies an element method to the element a selector resolves to.
    pub async fn perform_method(&self, call: &MethodCall) -> Result<ActionOutcome, ActionError> {
        info!(method = %call.method, selector = %call.selector, "performing element method");
        let screenshot_before = self.capture_screenshot().await;
        let url_before = self.known_url().await;

        let result = self.dispatch_method(call).await;
        let url_after = self.refresh_url().await;
        let screenshot_after = self.capture_screenshot().await;

        self.finish(
            RecordedStep::Method(call.clone()),
            Some(call.selector.clone()),
            result,
            url_before,
            url_after,
            screenshot_before,
            screenshot_after,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        step: RecordedStep,
        selector: Option<String>,
        result: Result<Effects, ActionError>,
        url_before: Option<String>,
        url_after: Option<String>,
        screenshot_before: Option<Vec<u8>>,
        screenshot_after: Option<Vec<u8>>,
    ) -> Result<ActionOutcome, ActionError> {
        let mut details = json!({
            "urlBefore": url_before,
            "urlAfter": url_after,
        });
        if let Ok(effects) = &result {
            details["newTabUrl"] = json!(effects.new_tab_url);
            details["scrollTarget"] = json!(effects.scroll_target);
        }
        if let Err(err) = &result {
            warn!(action = step.label(), error = %err, "action failed");
            details["error"] = json!(err.to_string());
        }

        self.recorder.record(
            RecordedAction::new(step, result.is_ok())
                .with_selector(selector.clone())
                .with_details(details),
        );

        let effects = result?;
        Ok(ActionOutcome {
            success: true,
            url_before,
            url_after,
            new_tab_url: effects.new_tab_url,
            scroll_target: effects.scroll_target,
            selector,
            screenshot_before,
            screenshot_after,
        })
    }

    async fn dispatch(&self, action: &AgentAction) -> Result<Effects, ActionError> {
        match action {
            AgentAction::Click { x, y, button } => {
                let new_tab_url = self.click_at(*x, *y, *button, 1).await?;
                Ok(Effects {
                    new_tab_url,
                    ..Default::default()
                })
            }
            AgentAction::DoubleClick { x, y } => {
                let new_tab_url = self.click_at(*x, *y, MouseButton::Left, 2).await?;
                Ok(Effects {
                    new_tab_url,
                    ..Default::default()
                })
            }
            AgentAction::Type { text } => {
                self.driver.insert_text(text).await?;
                Ok(Effects::default())
            }
            AgentAction::Keypress { keys } => {
                press_chord(self.driver.as_ref(), keys, self.config.platform).await?;
                Ok(Effects::default())
            }
            AgentAction::Key { text } => {
                press_chord(self.driver.as_ref(), &split_chord(text), self.config.platform).await?;
                Ok(Effects::default())
            }
            AgentAction::Scroll {
                x,
                y,
                scroll_x,
                scroll_y,
            } => {
                let origin = match (x, y) {
                    (Some(x), Some(y)) => {
                        self.move_pointer(*x, *y).await?;
                        Point::new(*x, *y)
                    }
                    _ => self.cursor_position(),
                };
                let target = self
                    .driver
                    .evaluate(&scripts::scroll_at_point_expression(
                        origin.x, origin.y, *scroll_x, *scroll_y,
                    ))
                    .await?;
                Ok(Effects::scrolled(Some(
                    target.as_str().unwrap_or("window").to_string(),
                )))
            }
            AgentAction::Drag { path } => {
                self.drag(path).await?;
                Ok(Effects::default())
            }
            AgentAction::Move { x, y } => {
                self.move_pointer(*x, *y).await?;
                Ok(Effects::default())
            }
            AgentAction::Wait { ms } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(Effects::default())
            }
            AgentAction::Screenshot => Ok(Effects {
                screenshot: Some(self.driver.screenshot().await?),
                ..Default::default()
            }),
            AgentAction::Function { name, arguments } => {
                self.call_function(name, arguments).await?;
                Ok(Effects::default())
            }
        }
    }

    async fn dispatch_method(&self, call: &MethodCall) -> Result<Effects, ActionError> {
        let method = call.element_method()?;
        let object_id = self.resolve_element(call).await?;
        let driver = self.driver.as_ref();

        match method {
            ElementMethod::ScrollIntoView => {
                driver
                    .call_function_on(&object_id, scripts::SCROLL_INTO_VIEW, vec![])
                    .await?;
                Ok(Effects::default())
            }
            ElementMethod::ScrollTo => {
                let percent = parse_percentage(call.argument(0))?;
                let target = driver
                    .call_function_on(&object_id, scripts::SCROLL_TO_PERCENT, vec![json!(percent)])
                    .await?;
                Ok(Effects::scrolled(target.as_str().map(str::to_string)))
            }
            ElementMethod::NextChunk | ElementMethod::PrevChunk => {
                let direction = if method == ElementMethod::NextChunk { 1 } else { -1 };
                let target = driver
                    .call_function_on(&object_id, scripts::SCROLL_CHUNK, vec![json!(direction)])
                    .await?;
                Ok(Effects::scrolled(target.as_str().map(str::to_string)))
            }
            ElementMethod::Fill => {
                driver
                    .call_function_on(&object_id, scripts::CLEAR_AND_FOCUS, vec![])
                    .await?;
                driver.insert_text(call.argument(0).unwrap_or_default()).await?;
                Ok(Effects::default())
            }
            ElementMethod::Type => {
                driver
                    .call_function_on(&object_id, scripts::CLEAR_AND_FOCUS, vec![])
                    .await?;
                type_humanlike(
                    driver,
                    call.argument(0).unwrap_or_default(),
                    self.config.typing_delay_ms(),
                )
                .await?;
                Ok(Effects::default())
            }
            ElementMethod::Press => {
                let key = required_argument(call, "press")?;
                press_chord(driver, &split_chord(key), self.config.platform).await?;
                Ok(Effects::default())
            }
            ElementMethod::Click => {
                let center = driver
                    .call_function_on(&object_id, scripts::CENTER_POINT, vec![])
                    .await?;
                let (Some(x), Some(y)) = (center["x"].as_f64(), center["y"].as_f64()) else {
                    return Err(ActionError::ElementNotFound(format!(
                        "{} has no clickable box",
                        call.selector
                    )));
                };
                let new_tab_url = self.click_at(x, y, MouseButton::Left, 1).await?;
                Ok(Effects {
                    new_tab_url,
                    ..Default::default()
                })
            }
            ElementMethod::SelectOption => {
                let value = required_argument(call, "selectOption")?;
                let selected = driver
                    .call_function_on(&object_id, scripts::SELECT_OPTION, vec![json!(value)])
                    .await?;
                if selected.as_bool() != Some(true) {
                    return Err(ActionError::OptionNotFound(format!(
                        "{value} in {}",
                        call.selector
                    )));
                }
                Ok(Effects::default())
            }
        }
    }

    async fn resolve_element(&self, call: &MethodCall) -> Result<String, ActionError> {
        let expression = scripts::element_lookup_expression(call.locator(), call.is_xpath());
        self.driver
            .evaluate_handle(&expression)
            .await?
            .ok_or_else(|| ActionError::ElementNotFound(call.selector.clone()))
    }

    /// Best-effort selector for the recorded step; never fails the action.
    async fn selector_hint(&self, action: &AgentAction) -> Option<String> {
        let result = match action {
            AgentAction::Click { x, y, .. } | AgentAction::DoubleClick { x, y } => {
                self.synthesizer.selector_for_point(*x, *y).await
            }
            AgentAction::Type { .. } | AgentAction::Keypress { .. } | AgentAction::Key { .. } => {
                self.synthesizer.selector_for_focused_element().await
            }
            _ => return None,
        };
        match result {
            Ok(selected) => selected.map(|s| s.selector),
            Err(err) => {
                debug!(error = %err, "selector synthesis skipped");
                None
            }
        }
    }

    async fn capture_screenshot(&self) -> Option<Vec<u8>> {
        if !self.config.capture_screenshots {
            return None;
        }
        match self.driver.screenshot().await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                debug!(error = %err, "screenshot skipped");
                None
            }
        }
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<(), ActionError> {
        self.cursor.move_to(&self.driver, x, y);
        self.driver.mouse_move(x, y).await?;
        *self.last_cursor.lock() = Point::new(x, y);
        Ok(())
    }

    /// Clicks at a point and folds any tab the click opened back into this page.
    async fn click_at(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        clicks: u32,
    ) -> Result<Option<String>, ActionError> {
        // subscribe before dispatch so a fast targetCreated is not missed
        let events = self.driver.events();

        self.cursor.click_at(&self.driver, x, y);
        self.driver.mouse_move(x, y).await?;
        *self.last_cursor.lock() = Point::new(x, y);
        for count in 1..=clicks {
            self.driver.mouse_down(x, y, button, count).await?;
            self.driver.mouse_up(x, y, button, count).await?;
        }

        self.follow_new_tab(events).await
    }

    async fn follow_new_tab(
        &self,
        mut events: broadcast::Receiver<PageEvent>,
    ) -> Result<Option<String>, ActionError> {
        let own = self.driver.target_id().to_string();
        let window = Duration::from_millis(self.config.new_tab_timeout_ms);
        let mut pending = None;
        let opened = timeout(window, next_new_tab(&mut events, &own, &mut pending))
            .await
            .ok()
            .flatten();

        let new_tab_url = match (opened, pending) {
            (Some((target_id, url)), _) => {
                info!(%target_id, %url, "click opened a new tab; loading it here instead");
                self.close_tab(&target_id).await;
                self.driver.navigate(&url).await?;
                Some(url)
            }
            (None, Some(target_id)) => {
                warn!(%target_id, "new tab never reported a url; closing it");
                self.close_tab(&target_id).await;
                None
            }
            (None, None) => None,
        };

        self.settle_network().await;
        Ok(new_tab_url)
    }

    async fn close_tab(&self, target_id: &str) {
        if let Err(err) = self.driver.close_target(target_id).await {
            warn!(%target_id, error = %err, "failed to close extra tab");
        }
    }

    async fn settle_network(&self) {
        let limit = Duration::from_millis(self.config.network_idle_timeout_ms);
        match self.driver.wait_for_network_idle(limit).await {
            Ok(true) => {}
            Ok(false) => debug!(timeout_ms = self.config.network_idle_timeout_ms, "network still busy"),
            Err(err) => debug!(error = %err, "network idle wait failed"),
        }
    }

    async fn drag(&self, path: &[Point]) -> Result<(), ActionError> {
        let (Some(first), Some(last)) = (path.first(), path.last()) else {
            return Err(ActionError::InvalidArgument("drag path is empty".to_string()));
        };
        self.move_pointer(first.x, first.y).await?;
        self.driver
            .mouse_down(first.x, first.y, MouseButton::Left, 1)
            .await?;
        for point in &path[1..] {
            self.cursor.move_to(&self.driver, point.x, point.y);
            self.driver
                .mouse_move_pressed(point.x, point.y, MouseButton::Left)
                .await?;
            *self.last_cursor.lock() = *point;
        }
        self.driver
            .mouse_up(last.x, last.y, MouseButton::Left, 1)
            .await?;
        Ok(())
    }

    async fn call_function(&self, name: &str, arguments: &Value) -> Result<(), ActionError> {
        match name {
            "goto" | "navigate" => {
                let url = arguments
                    .get("url")
                    .and_then(Value::as_str)
                    .or_else(|| arguments.as_str())
                    .or_else(|| arguments.get(0).and_then(Value::as_str))
                    .ok_or_else(|| ActionError::InvalidArgument("goto requires a url".to_string()))?;
                self.driver.navigate(url).await?;
            }
            "back" | "forward" => {
                let delta = if name == "back" { -1 } else { 1 };
                if !self.driver.history_step(delta).await? {
                    debug!(direction = name, "no history entry");
                }
            }
            "reload" => self.driver.reload().await?,
            other => return Err(ActionError::UnsupportedFunction(other.to_string())),
        }
        self.settle_network().await;
        Ok(())
    }
}

/// Waits for a page target other than `own`. A target created without a URL is
/// parked in `pending` until `Target.targetInfoChanged` supplies one.
async fn next_new_tab(
    events: &mut broadcast::Receiver<PageEvent>,
    own: &str,
    pending: &mut Option<String>,
) -> Option<(String, String)> {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "page event stream lagged");
                continue;
            }
            Err(RecvError::Closed) => return None,
        };
        let changed = match event.method.as_str() {
            "Target.targetCreated" => false,
            "Target.targetInfoChanged" => true,
            _ => continue,
        };
        let info = &event.params["targetInfo"];
        let Some(target_id) = info["targetId"].as_str() else {
            continue;
        };
        if info["type"].as_str() != Some("page") || target_id == own {
            continue;
        }
        if changed && pending.as_deref() != Some(target_id) {
            continue;
        }
        match info["url"]
            .as_str()
            .filter(|url| !url.is_empty() && *url != "about:blank")
        {
            Some(url) => return Some((target_id.to_string(), url.to_string())),
            None => *pending = Some(target_id.to_string()),
        }
    }
}

fn required_argument<'a>(call: &'a MethodCall, method: &str) -> Result<&'a str, ActionError> {
    call.argument(0)
        .ok_or_else(|| ActionError::InvalidArgument(format!("{method} requires an argument")))
}

/// Accepts `"50%"` or `"50"`, clamped to 0..=100.
fn parse_percentage(raw: Option<&str>) -> Result<f64, ActionError> {
    let raw = raw.ok_or_else(|| ActionError::InvalidArgument("scrollTo requires a percentage".into()))?;
    let value: f64 = raw
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse()
        .map_err(|_| ActionError::InvalidArgument(format!("invalid percentage {raw:?}")))?;
    if !value.is_finite() {
        return Err(ActionError::InvalidArgument(format!("invalid percentage {raw:?}")));
    }
    Ok(value.clamp(0.0, 100.0))
}
