use std::sync::Arc;
use std::time::Duration;

use action_locator::LocatorConfig;
use action_primitives::scripts::{CENTER_POINT, SELECT_OPTION};
use action_primitives::{
    ActionError, ActionExecutor, ActionRecorder, AgentAction, ExecutorConfig, MethodCall,
    Platform, RecordedStep,
};
use async_trait::async_trait;
use cdp_adapter::{AdapterError, AdapterErrorKind, MouseButton, PageDriver, PageEvent};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use waypoint_core_types::Point;

/// How the fake browser reacts to a mouse release.
#[derive(Clone, Copy)]
enum TabBehavior {
    None,
    Opens(&'static str),
    OpensBlankThen(&'static str),
}

struct FakePage {
    calls: Mutex<Vec<(String, Value)>>,
    url: Mutex<String>,
    events: broadcast::Sender<PageEvent>,
    tabs: TabBehavior,
    screenshot_fails: bool,
}

impl FakePage {
    fn new(tabs: TabBehavior) -> Arc<Self> {
        Self::build(tabs, false)
    }

    fn failing_screenshots() -> Arc<Self> {
        Self::build(TabBehavior::None, true)
    }

    fn build(tabs: TabBehavior, screenshot_fails: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            url: Mutex::new("https://shop.example/".to_string()),
            events: broadcast::channel(16).0,
            tabs,
            screenshot_fails,
        })
    }

    fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|(m, _)| m == method).count()
    }

    fn params(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn emit_target(&self, method: &str, id: &str, url: &str) {
        let _ = self.events.send(PageEvent {
            method: method.to_string(),
            params: json!({ "targetInfo": { "targetId": id, "type": "page", "url": url } }),
        });
    }

    fn evaluate(&self, expression: &str) -> Value {
        if expression == "window.location.href" {
            return json!({ "result": { "type": "string", "value": self.url.lock().clone() } });
        }
        if expression.starts_with("document.querySelector(") || expression.starts_with("document.evaluate(") {
            if expression.contains("missing") {
                return json!({ "result": { "type": "object", "subtype": "null", "value": null } });
            }
            return json!({ "result": { "type": "object", "objectId": "obj-1" } });
        }
        if expression.contains("elementFromPoint(x, y)") && expression.contains("scrollBy") {
            return json!({ "result": { "type": "string", "value": "div#feed" } });
        }
        // selector probes: nothing describable
        json!({ "result": { "type": "object", "subtype": "null", "value": null } })
    }
}

#[async_trait]
impl PageDriver for FakePage {
    fn target_id(&self) -> &str {
        "T1"
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.calls.lock().push((method.to_string(), params.clone()));
        match method {
            "Runtime.evaluate" => Ok(self.evaluate(params["expression"].as_str().unwrap_or_default())),
            "Runtime.callFunctionOn" => {
                let declaration = params["functionDeclaration"].as_str().unwrap_or_default();
                let value = if declaration == CENTER_POINT {
                    json!({ "x": 50.0, "y": 60.0 })
                } else if declaration == SELECT_OPTION {
                    json!(params["arguments"][0]["value"] == "Blue")
                } else {
                    json!("window")
                };
                Ok(json!({ "result": { "value": value } }))
            }
            "Input.dispatchMouseEvent" => {
                if params["type"] == "mouseReleased" {
                    match self.tabs {
                        TabBehavior::None => {}
                        TabBehavior::Opens(url) => self.emit_target("Target.targetCreated", "T2", url),
                        TabBehavior::OpensBlankThen(url) => {
                            self.emit_target("Target.targetCreated", "T2", "about:blank");
                            self.emit_target("Target.targetInfoChanged", "T2", url);
                        }
                    }
                }
                Ok(json!({}))
            }
            "Page.navigate" => {
                *self.url.lock() = params["url"].as_str().unwrap_or_default().to_string();
                Ok(json!({ "frameId": "F1" }))
            }
            "Page.captureScreenshot" if self.screenshot_fails => {
                Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("renderer busy"))
            }
            "Page.captureScreenshot" => Ok(json!({ "data": "iVBORw0KGgo=" })),
            _ => Ok(json!({})),
        }
    }

    async fn send_browser(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.calls.lock().push((method.to_string(), params));
        Ok(json!({ "success": true }))
    }

    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<bool, AdapterError> {
        self.calls.lock().push(("networkIdle".to_string(), Value::Null));
        Ok(true)
    }
}

fn executor(page: &Arc<FakePage>) -> ActionExecutor<FakePage> {
    ActionExecutor::with_config(
        Arc::clone(page),
        Arc::new(ActionRecorder::new()),
        ExecutorConfig {
            show_cursor: false,
            platform: Platform::Other,
            ..Default::default()
        },
        LocatorConfig::default(),
    )
}

fn click(x: f64, y: f64) -> AgentAction {
    AgentAction::Click {
        x,
        y,
        button: MouseButton::Left,
    }
}

#[tokio::test(start_paused = true)]
async fn test_click_opening_tab_navigates_original_page_once() {
    let page = FakePage::new(TabBehavior::Opens("https://docs.example/guide"));
    let executor = executor(&page);

    let outcome = executor.execute(&click(120.0, 48.0)).await.unwrap();

    assert_eq!(page.count("Page.navigate"), 1);
    assert_eq!(page.params("Page.navigate")[0]["url"], "https://docs.example/guide");
    assert_eq!(page.count("Target.closeTarget"), 1);
    assert_eq!(page.params("Target.closeTarget")[0]["targetId"], "T2");
    assert_eq!(page.count("networkIdle"), 1);
    assert_eq!(outcome.new_tab_url.as_deref(), Some("https://docs.example/guide"));
    assert_eq!(outcome.url_before.as_deref(), Some("https://shop.example/"));
    assert_eq!(outcome.url_after.as_deref(), Some("https://docs.example/guide"));
    assert_eq!(executor.current_url().as_deref(), Some("https://docs.example/guide"));
    assert_eq!(executor.cursor_position(), Point::new(120.0, 48.0));
}

#[tokio::test(start_paused = true)]
async fn test_click_without_new_tab_leaves_url_alone() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    let started = tokio::time::Instant::now();
    let outcome = executor.execute(&click(10.0, 10.0)).await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(page.count("Page.navigate"), 0);
    assert_eq!(page.count("Target.closeTarget"), 0);
    assert_eq!(page.count("networkIdle"), 1);
    assert_eq!(outcome.new_tab_url, None);
    assert_eq!(outcome.url_after.as_deref(), Some("https://shop.example/"));

    let mouse: Vec<String> = page
        .params("Input.dispatchMouseEvent")
        .iter()
        .map(|p| p["type"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(mouse, vec!["mouseMoved", "mousePressed", "mouseReleased"]);
}

#[tokio::test(start_paused = true)]
async fn test_blank_tab_waits_for_its_url() {
    let page = FakePage::new(TabBehavior::OpensBlankThen("https://pay.example/checkout"));
    let executor = executor(&page);

    let outcome = executor
        .execute(&AgentAction::DoubleClick { x: 5.0, y: 5.0 })
        .await
        .unwrap();

    assert_eq!(outcome.new_tab_url.as_deref(), Some("https://pay.example/checkout"));
    assert_eq!(page.count("Page.navigate"), 1);
    assert_eq!(page.count("Target.closeTarget"), 1);
    let counts: Vec<i64> = page
        .params("Input.dispatchMouseEvent")
        .iter()
        .filter(|p| p["type"] == "mousePressed")
        .map(|p| p["clickCount"].as_i64().unwrap())
        .collect();
    assert_eq!(counts, vec![1, 2]);
}

#[tokio::test]
async fn test_keypress_chord_releases_in_reverse() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    executor
        .execute(&AgentAction::Keypress {
            keys: vec!["CTRL".into(), "a".into()],
        })
        .await
        .unwrap();

    let events: Vec<(String, String, u64)> = page
        .params("Input.dispatchKeyEvent")
        .iter()
        .map(|p| {
            (
                p["type"].as_str().unwrap().to_string(),
                p["key"].as_str().unwrap().to_string(),
                p["modifiers"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        events,
        vec![
            ("rawKeyDown".to_string(), "Control".to_string(), 2),
            ("rawKeyDown".to_string(), "a".to_string(), 2),
            ("keyUp".to_string(), "a".to_string(), 2),
            ("keyUp".to_string(), "Control".to_string(), 0),
        ]
    );
}

#[tokio::test]
async fn test_key_action_uses_platform_command_key() {
    let page = FakePage::new(TabBehavior::None);
    let executor = ActionExecutor::with_config(
        Arc::clone(&page),
        Arc::new(ActionRecorder::new()),
        ExecutorConfig {
            show_cursor: false,
            platform: Platform::MacOs,
            ..Default::default()
        },
        LocatorConfig::default(),
    );

    executor
        .execute(&AgentAction::Key {
            text: "cmd+c".into(),
        })
        .await
        .unwrap();
    let first = &page.params("Input.dispatchKeyEvent")[0];
    assert_eq!(first["key"], "Meta");
}

#[tokio::test]
async fn test_type_action_inserts_whole_string() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    executor
        .execute(&AgentAction::Type {
            text: "hello world".into(),
        })
        .await
        .unwrap();
    assert_eq!(page.count("Input.insertText"), 1);
    assert_eq!(page.count("Input.dispatchKeyEvent"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_type_method_sends_each_character() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    let started = tokio::time::Instant::now();
    executor
        .perform_method(&MethodCall::new("type", "#email").with_argument("abc"))
        .await
        .unwrap();

    let downs = page
        .params("Input.dispatchKeyEvent")
        .iter()
        .filter(|p| p["type"] == "keyDown")
        .count();
    assert_eq!(downs, 3);
    assert_eq!(page.count("Input.insertText"), 0);
    assert!(started.elapsed() >= Duration::from_millis(75));
    assert!(started.elapsed() <= Duration::from_millis(225));
}

#[tokio::test]
async fn test_failures_are_typed_and_still_recorded() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    let err = executor
        .perform_method(&MethodCall::new("click", "#missing"))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::ElementNotFound(ref s) if s == "#missing"));

    let err = executor
        .perform_method(&MethodCall::new("hover", "#email"))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::UnsupportedMethod(_)));

    let err = executor
        .execute(&AgentAction::Function {
            name: "teleport".into(),
            arguments: Value::Null,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::UnsupportedFunction(_)));

    let recorded = executor.recorder().actions();
    assert_eq!(recorded.len(), 3);
    assert!(recorded.iter().all(|entry| !entry.success));
    assert_eq!(recorded[0].selector.as_deref(), Some("#missing"));
    assert!(recorded[0].details["error"]
        .as_str()
        .unwrap()
        .contains("#missing"));
    assert!(matches!(&recorded[2].action, RecordedStep::Agent(AgentAction::Function { .. })));
}

#[tokio::test]
async fn test_select_option_reports_missing_option() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    executor
        .perform_method(&MethodCall::new("selectOption", "//select[@name='color']").with_argument("Blue"))
        .await
        .unwrap();
    let err = executor
        .perform_method(&MethodCall::new("selectOption", "//select[@name='color']").with_argument("Mauve"))
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::OptionNotFound(_)));

    let lookups: Vec<String> = page
        .params("Runtime.evaluate")
        .iter()
        .filter_map(|p| p["expression"].as_str().map(str::to_string))
        .filter(|e| e.starts_with("document.evaluate("))
        .collect();
    assert_eq!(lookups.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_click_method_uses_element_center() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    executor
        .perform_method(&MethodCall::new("click", "xpath=/html/body/button"))
        .await
        .unwrap();
    let pressed = page
        .params("Input.dispatchMouseEvent")
        .into_iter()
        .find(|p| p["type"] == "mousePressed")
        .unwrap();
    assert_eq!(pressed["x"], 50.0);
    assert_eq!(pressed["y"], 60.0);
}

#[tokio::test]
async fn test_screenshot_failure_does_not_fail_action() {
    let page = FakePage::failing_screenshots();
    let executor = executor(&page);

    let outcome = executor
        .execute(&AgentAction::Move { x: 3.0, y: 4.0 })
        .await
        .unwrap();
    assert!(outcome.success);
    assert!(outcome.screenshot_before.is_none());
    assert!(outcome.screenshot_after.is_none());

    let err = executor.execute(&AgentAction::Screenshot).await.unwrap_err();
    assert!(matches!(err, ActionError::CdpIo(_)));
}

#[tokio::test]
async fn test_screenshot_action_returns_capture() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    let outcome = executor.execute(&AgentAction::Screenshot).await.unwrap();
    assert_eq!(
        outcome.screenshot_after.as_deref(),
        Some(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a][..])
    );
}

#[tokio::test]
async fn test_scroll_reports_scrolled_container() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    let outcome = executor
        .execute(&AgentAction::Scroll {
            x: Some(200.0),
            y: Some(300.0),
            scroll_x: 0.0,
            scroll_y: 400.0,
        })
        .await
        .unwrap();
    assert_eq!(outcome.scroll_target.as_deref(), Some("div#feed"));
    assert_eq!(executor.cursor_position(), Point::new(200.0, 300.0));
}

#[tokio::test]
async fn test_goto_refreshes_cached_url() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    executor
        .execute(&AgentAction::Function {
            name: "goto".into(),
            arguments: json!({ "url": "https://news.example/" }),
        })
        .await
        .unwrap();
    assert_eq!(executor.current_url().as_deref(), Some("https://news.example/"));
    assert_eq!(page.count("networkIdle"), 1);
}

#[tokio::test]
async fn test_empty_drag_path_is_rejected() {
    let page = FakePage::new(TabBehavior::None);
    let executor = executor(&page);

    let err = executor
        .execute(&AgentAction::Drag { path: vec![] })
        .await
        .unwrap_err();
    assert!(matches!(err, ActionError::InvalidArgument(_)));

    executor
        .execute(&AgentAction::Drag {
            path: vec![Point::new(0.0, 0.0), Point::new(5.0, 5.0), Point::new(9.0, 9.0)],
        })
        .await
        .unwrap();
    let held: Vec<i64> = page
        .params("Input.dispatchMouseEvent")
        .iter()
        .filter(|p| p["type"] == "mouseMoved")
        .map(|p| p["buttons"].as_i64().unwrap_or(0))
        .collect();
    assert_eq!(held, vec![0, 1, 1]);
    assert_eq!(executor.cursor_position(), Point::new(9.0, 9.0));
}
