//! Action vocabulary, element methods and execution outcomes

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use cdp_adapter::MouseButton;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use waypoint_core_types::Point;

use crate::errors::ActionError;
use crate::keys::Platform;

fn default_wait_ms() -> u64 {
    1000
}

/// One computer-use step chosen by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentAction {
    Click {
        x: f64,
        y: f64,
        #[serde(default)]
        button: MouseButton,
    },
    DoubleClick {
        x: f64,
        y: f64,
    },
    /// Sends the whole string as one keyboard insert.
    Type {
        text: String,
    },
    /// Chord of logical key names, pressed in order and released in reverse.
    Keypress {
        keys: Vec<String>,
    },
    /// A chord written as one string, e.g. `"ctrl+a"`.
    Key {
        text: String,
    },
    Scroll {
        #[serde(default)]
        x: Option<f64>,
        #[serde(default)]
        y: Option<f64>,
        #[serde(default)]
        scroll_x: f64,
        #[serde(default)]
        scroll_y: f64,
    },
    Drag {
        path: Vec<Point>,
    },
    Move {
        x: f64,
        y: f64,
    },
    Wait {
        #[serde(default = "default_wait_ms")]
        ms: u64,
    },
    Screenshot,
    /// Navigation primitives: `goto`, `back`, `forward`, `reload`.
    Function {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
}

impl AgentAction {
    pub fn kind(&self) -> &'static str {
        match self {
            AgentAction::Click { .. } => "click",
            AgentAction::DoubleClick { .. } => "double_click",
            AgentAction::Type { .. } => "type",
            AgentAction::Keypress { .. } => "keypress",
            AgentAction::Key { .. } => "key",
            AgentAction::Scroll { .. } => "scroll",
            AgentAction::Drag { .. } => "drag",
            AgentAction::Move { .. } => "move",
            AgentAction::Wait { .. } => "wait",
            AgentAction::Screenshot => "screenshot",
            AgentAction::Function { .. } => "function",
        }
    }
}

/// Method applied to an element resolved from a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementMethod {
    ScrollIntoView,
    ScrollTo,
    NextChunk,
    PrevChunk,
    Fill,
    Type,
    Press,
    Click,
    SelectOption,
}

impl ElementMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementMethod::ScrollIntoView => "scrollIntoView",
            ElementMethod::ScrollTo => "scrollTo",
            ElementMethod::NextChunk => "nextChunk",
            ElementMethod::PrevChunk => "prevChunk",
            ElementMethod::Fill => "fill",
            ElementMethod::Type => "type",
            ElementMethod::Press => "press",
            ElementMethod::Click => "click",
            ElementMethod::SelectOption => "selectOption",
        }
    }
}

impl fmt::Display for ElementMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementMethod {
    type Err = ActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "scrollIntoView" => ElementMethod::ScrollIntoView,
            "scrollTo" => ElementMethod::ScrollTo,
            "nextChunk" => ElementMethod::NextChunk,
            "prevChunk" => ElementMethod::PrevChunk,
            "fill" => ElementMethod::Fill,
            "type" => ElementMethod::Type,
            "press" => ElementMethod::Press,
            "click" => ElementMethod::Click,
            "selectOption" => ElementMethod::SelectOption,
            other => return Err(ActionError::UnsupportedMethod(other.to_string())),
        })
    }
}

/// An element method call as produced by `observe`/`act`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodCall {
    pub method: String,
    pub selector: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            selector: selector.into(),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, argument: impl Into<String>) -> Self {
        self.arguments.push(argument.into());
        self
    }

    pub fn element_method(&self) -> Result<ElementMethod, ActionError> {
        self.method.parse()
    }

    /// `true` when the selector is an XPath (`/…` or `xpath=…`).
    pub fn is_xpath(&self) -> bool {
        let selector = self.selector.trim_start();
        selector.starts_with('/') || selector.starts_with("xpath=")
    }

    /// Selector with any `xpath=` prefix removed.
    pub fn locator(&self) -> &str {
        let selector = self.selector.trim();
        selector.strip_prefix("xpath=").unwrap_or(selector)
    }

    pub fn argument(&self, idx: usize) -> Option<&str> {
        self.arguments.get(idx).map(String::as_str)
    }
}

/// What one executed action did to the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default)]
    pub url_before: Option<String>,
    #[serde(default)]
    pub url_after: Option<String>,
    /// URL of a tab opened by the action and folded back into the original page
    #[serde(default)]
    pub new_tab_url: Option<String>,
    /// `"window"` or a short description of the scrolled element
    #[serde(default)]
    pub scroll_target: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(skip)]
    pub screenshot_before: Option<Vec<u8>>,
    #[serde(skip)]
    pub screenshot_after: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Window in which a click may open a new tab
    pub new_tab_timeout_ms: u64,
    pub network_idle_timeout_ms: u64,
    pub capture_screenshots: bool,
    /// Per-character delay range for human-paced typing
    pub typing_delay_min_ms: u64,
    pub typing_delay_max_ms: u64,
    pub show_cursor: bool,
    pub platform: Platform,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            new_tab_timeout_ms: 1500,
            network_idle_timeout_ms: 5000,
            capture_screenshots: true,
            typing_delay_min_ms: 25,
            typing_delay_max_ms: 75,
            show_cursor: true,
            platform: Platform::detect(),
        }
    }
}

impl ExecutorConfig {
    pub fn typing_delay_ms(&self) -> RangeInclusive<u64> {
        let (a, b) = (self.typing_delay_min_ms, self.typing_delay_max_ms);
        a.min(b)..=a.max(b)
    }
}
