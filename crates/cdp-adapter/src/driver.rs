//! The narrow page interface consumed by the perception and action layers.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{AdapterError, AdapterErrorKind};
use crate::input::{key_definition, modifiers, MouseButton};
use crate::util::{decode_base64, runtime_value};

/// Protocol event scoped to one page (or browser-wide target events).
#[derive(Clone, Debug)]
pub struct PageEvent {
    pub method: String,
    pub params: Value,
}

/// A page reachable over the remote-debugging channel.
///
/// Implementors provide the raw command channel and an event subscription; the
/// protocol helpers are provided on top of [`PageDriver::send`].
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Target id of the page this driver controls.
    fn target_id(&self) -> &str;

    /// Sends a command on the page session.
    async fn send(&self, method: &str, params: Value) -> Result<Value, AdapterError>;

    /// Sends a browser-level command (target management).
    async fn send_browser(&self, method: &str, params: Value) -> Result<Value, AdapterError>;

    /// Subscribes to page and target events. Events sent before the call are not replayed.
    fn events(&self) -> broadcast::Receiver<PageEvent>;

    /// Waits until no requests are in flight for a short quiet window.
    /// Returns `false` when the timeout elapses first.
    async fn wait_for_network_idle(&self, timeout: Duration) -> Result<bool, AdapterError>;

    async fn enable_domain(&self, domain: &str) -> Result<(), AdapterError> {
        self.send(&format!("{domain}.enable"), json!({})).await?;
        Ok(())
    }

    async fn disable_domain(&self, domain: &str) -> Result<(), AdapterError> {
        self.send(&format!("{domain}.disable"), json!({})).await?;
        Ok(())
    }

    /// Evaluates an expression and returns its JSON value (promises awaited).
    async fn evaluate(&self, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        runtime_value(response)
    }

    /// Evaluates an expression and returns a remote object id, or `None` for null/undefined.
    async fn evaluate_handle(&self, expression: &str) -> Result<Option<String>, AdapterError> {
        let response = self
            .send(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": false }),
            )
            .await?;
        if response.get("exceptionDetails").is_some() {
            runtime_value(response)?;
            return Ok(None);
        }
        Ok(response
            .pointer("/result/objectId")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Invokes `declaration` with `this` bound to the remote object.
    async fn call_function_on(
        &self,
        object_id: &str,
        declaration: &str,
        arguments: Vec<Value>,
    ) -> Result<Value, AdapterError> {
        let arguments: Vec<Value> = arguments
            .into_iter()
            .map(|value| json!({ "value": value }))
            .collect();
        let response = self
            .send(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": declaration,
                    "arguments": arguments,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        runtime_value(response)
    }

    /// Resolves a backend DOM node id into a remote object id.
    async fn resolve_node(&self, backend_node_id: i64) -> Result<Option<String>, AdapterError> {
        let response = self
            .send("DOM.resolveNode", json!({ "backendNodeId": backend_node_id }))
            .await?;
        Ok(response
            .pointer("/object/objectId")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    /// Describes the DOM node behind a remote object.
    async fn describe_node(&self, object_id: &str) -> Result<Value, AdapterError> {
        let response = self
            .send("DOM.describeNode", json!({ "objectId": object_id }))
            .await?;
        response
            .get("node")
            .cloned()
            .ok_or_else(|| AdapterError::missing_field("DOM.describeNode", "node"))
    }

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), AdapterError> {
        self.mouse_move_pressed(x, y, MouseButton::None).await
    }

    /// Pointer move while `button` is held (drags).
    async fn mouse_move_pressed(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
    ) -> Result<(), AdapterError> {
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseMoved",
                "x": x,
                "y": y,
                "button": button.as_cdp(),
                "buttons": button.buttons_mask(),
            }),
        )
        .await?;
        Ok(())
    }

    async fn mouse_down(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), AdapterError> {
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mousePressed",
                "x": x,
                "y": y,
                "button": button.as_cdp(),
                "buttons": button.buttons_mask(),
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    async fn mouse_up(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        click_count: u32,
    ) -> Result<(), AdapterError> {
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseReleased",
                "x": x,
                "y": y,
                "button": button.as_cdp(),
                "buttons": 0,
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    async fn mouse_wheel(
        &self,
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
    ) -> Result<(), AdapterError> {
        self.send(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseWheel",
                "x": x,
                "y": y,
                "deltaX": delta_x,
                "deltaY": delta_y,
            }),
        )
        .await?;
        Ok(())
    }

    /// Presses `key` while the `active_modifiers` bit set is held.
    async fn key_down(&self, key: &str, active_modifiers: u32) -> Result<(), AdapterError> {
        let def = key_definition(key);
        // Chords such as Ctrl+C must not insert text.
        let text = def
            .text
            .filter(|_| active_modifiers & !modifiers::SHIFT == 0);
        let mut params = json!({
            "type": if text.is_some() { "keyDown" } else { "rawKeyDown" },
            "key": def.key,
            "code": def.code,
            "windowsVirtualKeyCode": def.key_code,
            "nativeVirtualKeyCode": def.key_code,
            "modifiers": active_modifiers,
        });
        if let Some(text) = text {
            params["text"] = json!(text);
            params["unmodifiedText"] = json!(text);
        }
        self.send("Input.dispatchKeyEvent", params).await?;
        Ok(())
    }

    async fn key_up(&self, key: &str, active_modifiers: u32) -> Result<(), AdapterError> {
        let def = key_definition(key);
        self.send(
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": def.key,
                "code": def.code,
                "windowsVirtualKeyCode": def.key_code,
                "nativeVirtualKeyCode": def.key_code,
                "modifiers": active_modifiers,
            }),
        )
        .await?;
        Ok(())
    }

    async fn insert_text(&self, text: &str) -> Result<(), AdapterError> {
        self.send("Input.insertText", json!({ "text": text })).await?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), AdapterError> {
        let response = self.send("Page.navigate", json!({ "url": url })).await?;
        if let Some(error_text) = response
            .get("errorText")
            .and_then(Value::as_str)
            .filter(|text| !text.is_empty())
        {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("navigation to {url} failed: {error_text}")));
        }
        Ok(())
    }

    /// Moves through session history by `delta` entries. Returns `false` at either end.
    async fn history_step(&self, delta: i64) -> Result<bool, AdapterError> {
        let history = self
            .send("Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .ok_or_else(|| AdapterError::missing_field("Page.getNavigationHistory", "currentIndex"))?;
        let entries = history
            .get("entries")
            .and_then(Value::as_array)
            .ok_or_else(|| AdapterError::missing_field("Page.getNavigationHistory", "entries"))?;

        let target = current + delta;
        let Some(entry) = usize::try_from(target).ok().and_then(|idx| entries.get(idx)) else {
            debug!(current, delta, "history step out of range");
            return Ok(false);
        };
        let entry_id = entry
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| AdapterError::missing_field("Page.getNavigationHistory", "entries[].id"))?;
        self.send(
            "Page.navigateToHistoryEntry",
            json!({ "entryId": entry_id }),
        )
        .await?;
        Ok(true)
    }

    async fn reload(&self) -> Result<(), AdapterError> {
        self.send("Page.reload", json!({})).await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String, AdapterError> {
        let value = self.evaluate("window.location.href").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AdapterError::script("location.href is not a string"))
    }

    /// Polls `document.readyState` until the document has loaded or the timeout elapses.
    async fn wait_for_load(&self, timeout: Duration) -> Result<bool, AdapterError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.evaluate("document.readyState").await {
                Ok(state) if state.as_str() == Some("complete") => return Ok(true),
                Ok(_) => {}
                // Contexts are torn down mid-navigation; keep polling.
                Err(err) if err.kind == AdapterErrorKind::Script => {}
                Err(err) => return Err(err),
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Captures the viewport as PNG bytes.
    async fn screenshot(&self) -> Result<Vec<u8>, AdapterError> {
        let response = self
            .send("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| AdapterError::missing_field("Page.captureScreenshot", "data"))?;
        decode_base64(data)
    }

    async fn close_target(&self, target_id: &str) -> Result<(), AdapterError> {
        self.send_browser("Target.closeTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }
}
