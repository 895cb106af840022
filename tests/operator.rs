use std::sync::Arc;
use std::time::Duration;

use action_primitives::{scripts, ActionExecutor, ActionRecorder, ExecutorConfig};
use action_locator::LocatorConfig;
use agent_core::{ChatCompletionResponse, InferencePipeline, MockLlmClient, VerifyVerdict};
use async_trait::async_trait;
use cdp_adapter::{AdapterError, PageDriver, PageEvent};
use parking_lot::Mutex;
use perceiver_structural::scripts::{
    NODE_PATH_FUNCTION, SCROLLABLE_XPATHS_EXPRESSION, TAG_NAME_FUNCTION,
};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use waypoint_cli::{Operator, OperatorOptions};
use waypoint_core_types::TokenUsage;

struct LoginPage {
    calls: Mutex<Vec<String>>,
    typed: Mutex<Vec<String>>,
    events: broadcast::Sender<PageEvent>,
}

impl LoginPage {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            typed: Mutex::new(Vec::new()),
            events: broadcast::channel(16).0,
        })
    }

    fn count(&self, method: &str) -> usize {
        self.calls.lock().iter().filter(|m| *m == method).count()
    }
}

fn ax(id: &str, role: &str, name: &str, parent: Option<&str>, children: &[&str], backend: i64) -> Value {
    let mut node = json!({
        "nodeId": id,
        "role": { "type": "role", "value": role },
        "name": { "type": "computedString", "value": name },
        "childIds": children,
        "backendDOMNodeId": backend,
    });
    if let Some(parent) = parent {
        node["parentId"] = json!(parent);
    }
    node
}

#[async_trait]
impl PageDriver for LoginPage {
    fn target_id(&self) -> &str {
        "T1"
    }

    async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.calls.lock().push(method.to_string());
        match method {
            "Accessibility.getFullAXTree" => Ok(json!({ "nodes": [
                ax("1", "RootWebArea", "Login", None, &["2", "3"], 1),
                ax("2", "textbox", "Email", Some("1"), &[], 20),
                ax("3", "button", "Sign in", Some("1"), &[], 30),
            ]})),
            "Runtime.evaluate" => {
                let expression = params["expression"].as_str().unwrap_or_default();
                if expression == SCROLLABLE_XPATHS_EXPRESSION {
                    Ok(json!({ "result": { "type": "object", "value": [] } }))
                } else if expression.contains("location.href") {
                    Ok(json!({ "result": { "type": "string", "value": "https://shop.test/login" } }))
                } else {
                    Ok(json!({ "result": { "type": "object", "objectId": "el-1" } }))
                }
            }
            "DOM.resolveNode" => {
                let id = params["backendNodeId"].as_i64().unwrap_or_default();
                Ok(json!({ "object": { "objectId": format!("obj-{id}") } }))
            }
            "Runtime.callFunctionOn" => {
                let object = params["objectId"].as_str().unwrap_or_default();
                let declaration = params["functionDeclaration"].as_str().unwrap_or_default();
                let value = if declaration == NODE_PATH_FUNCTION {
                    match object {
                        "obj-20" => json!("/html/body/form/input"),
                        "obj-30" => json!("/html/body/form/button"),
                        _ => json!("/html"),
                    }
                } else if declaration == TAG_NAME_FUNCTION {
                    json!("div")
                } else if declaration == scripts::CENTER_POINT {
                    json!({ "x": 120.0, "y": 48.0 })
                } else {
                    json!(true)
                };
                Ok(json!({ "result": { "value": value } }))
            }
            "Input.insertText" => {
                self.typed
                    .lock()
                    .push(params["text"].as_str().unwrap_or_default().to_string());
                Ok(json!({}))
            }
            _ => Ok(json!({})),
        }
    }

    async fn send_browser(&self, method: &str, _params: Value) -> Result<Value, AdapterError> {
        self.calls.lock().push(method.to_string());
        Ok(json!({}))
    }

    fn events(&self) -> broadcast::Receiver<PageEvent> {
        self.events.subscribe()
    }

    async fn wait_for_network_idle(&self, _timeout: Duration) -> Result<bool, AdapterError> {
        Ok(true)
    }
}

fn executor(page: &Arc<LoginPage>, recorder: &Arc<ActionRecorder>) -> ActionExecutor<LoginPage> {
    ActionExecutor::with_config(
        Arc::clone(page),
        Arc::clone(recorder),
        ExecutorConfig {
            new_tab_timeout_ms: 20,
            capture_screenshots: false,
            show_cursor: false,
            ..ExecutorConfig::default()
        },
        LocatorConfig::default(),
    )
}

fn do_action(method: &str, element: &str, args: &[&str], completed: bool) -> ChatCompletionResponse {
    ChatCompletionResponse::with_tool_call(
        "doAction",
        json!({
            "method": method,
            "element": element,
            "arguments": args,
            "step": format!("{method} {element}"),
            "completed": completed
        }),
        TokenUsage::new(100, 10),
    )
}

#[tokio::test]
async fn operator_fills_clicks_and_verifies() {
    let page = LoginPage::new();
    let recorder = Arc::new(ActionRecorder::new());
    recorder.start_session();

    let mock = MockLlmClient::new();
    mock.push_response(do_action("fill", "2", &["<|EMAIL|>"], false));
    mock.push_response(do_action("click", "3", &[], true));
    mock.push_response(ChatCompletionResponse::with_data(
        json!({ "completed": true }),
        TokenUsage::new(50, 1),
    ));

    let operator = Operator::new(executor(&page, &recorder), InferencePipeline::new(mock))
        .with_options(OperatorOptions {
            max_steps: 5,
            variables: [("EMAIL".to_string(), "ada@example.com".to_string())].into(),
        });

    let report = operator.run("Sign in").await.expect("run");
    assert!(report.completed);
    assert_eq!(report.verdict, Some(VerifyVerdict::Confirmed));
    assert_eq!(report.steps.len(), 2);
    assert_eq!(report.steps[0].selector.as_deref(), Some("/html/body/form/input"));
    assert_eq!(report.steps[1].selector.as_deref(), Some("/html/body/form/button"));
    assert!(report.steps.iter().all(|step| step.succeeded()));
    assert_eq!(report.usage, TokenUsage::new(250, 21));

    assert_eq!(page.typed.lock().clone(), vec!["ada@example.com".to_string()]);
    assert_eq!(page.count("Input.dispatchMouseEvent"), 3);
    // Accessibility is enabled and disabled around each of the three captures.
    assert_eq!(page.count("Accessibility.enable"), 3);
    assert_eq!(page.count("Accessibility.disable"), 3);
    assert_eq!(recorder.len(), 2);

    let requests = operator.pipeline().client().requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].messages[1].content.contains("1. fill [2] fill 2 (ok)"));
}

#[tokio::test]
async fn unverified_completion_keeps_going_until_max_steps() {
    let page = LoginPage::new();
    let recorder = Arc::new(ActionRecorder::new());

    let mock = MockLlmClient::new();
    mock.push_response(do_action("click", "3", &[], true));
    mock.push_response(ChatCompletionResponse::with_data(json!({}), TokenUsage::new(5, 1)));
    mock.push_response(do_action("click", "3", &[], false));

    let operator = Operator::new(executor(&page, &recorder), InferencePipeline::new(mock))
        .with_options(OperatorOptions {
            max_steps: 2,
            ..OperatorOptions::default()
        });

    let report = operator.run("Sign in").await.expect("run");
    assert!(!report.completed);
    assert_eq!(report.verdict, Some(VerifyVerdict::MissingField));
    assert_eq!(report.steps.len(), 2);
}

#[tokio::test]
async fn unknown_element_is_reported_not_executed() {
    let page = LoginPage::new();
    let recorder = Arc::new(ActionRecorder::new());

    let mock = MockLlmClient::new();
    mock.push_response(do_action("click", "99", &[], false));
    // Queue drained: the next act sees three empty replies and stops the run.

    let operator = Operator::new(executor(&page, &recorder), InferencePipeline::new(mock));
    let report = operator.run("Sign in").await.expect("run");

    assert_eq!(report.steps.len(), 1);
    assert!(report.steps[0].selector.is_none());
    assert!(report.steps[0].error.as_deref().unwrap_or_default().contains("99"));
    assert_eq!(page.count("Input.dispatchMouseEvent"), 0);
    assert!(recorder.is_empty());
    // One act call, then three empty attempts.
    assert_eq!(operator.pipeline().client().requests().len(), 4);
}
