//! Append-only per-session log of executed actions, persisted as a replayable JSON array.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use waypoint_core_types::SessionId;

use crate::errors::RecorderError;
use crate::types::{AgentAction, MethodCall};

/// Either an agent-level action or an element method call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordedStep {
    Agent(AgentAction),
    Method(MethodCall),
}

impl RecordedStep {
    pub fn label(&self) -> &str {
        match self {
            RecordedStep::Agent(action) => action.kind(),
            RecordedStep::Method(call) => &call.method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    pub action: RecordedStep,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default)]
    pub details: Value,
}

impl RecordedAction {
    pub fn new(action: RecordedStep, success: bool) -> Self {
        Self {
            action,
            timestamp: Utc::now(),
            success,
            selector: None,
            details: Value::Null,
        }
    }

    pub fn with_selector(mut self, selector: Option<String>) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Default)]
struct SessionState {
    id: Option<SessionId>,
    actions: Vec<RecordedAction>,
}

/// Records actions for the current session. Starting a session discards the previous one.
#[derive(Default)]
pub struct ActionRecorder {
    state: Mutex<SessionState>,
}

impl ActionRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_session(&self) -> SessionId {
        let id = SessionId::new();
        let mut state = self.state.lock();
        state.id = Some(id.clone());
        state.actions.clear();
        info!(session = %id, "recording session started");
        id
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.state.lock().id.clone()
    }

    /// Appends one entry; opens a session implicitly if none is active.
    pub fn record(&self, entry: RecordedAction) {
        let mut state = self.state.lock();
        if state.id.is_none() {
            let id = SessionId::new();
            debug!(session = %id, "recording without explicit session");
            state.id = Some(id);
        }
        debug!(
            action = entry.action.label(),
            success = entry.success,
            "recorded action"
        );
        state.actions.push(entry);
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.state.lock().actions.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the session to `<dir>/session-<id>.json` and closes it.
    pub fn end_session(&self, dir: impl AsRef<Path>) -> Result<PathBuf, RecorderError> {
        let (id, actions) = {
            let mut state = self.state.lock();
            let id = state.id.take().ok_or(RecorderError::NoSession)?;
            (id, std::mem::take(&mut state.actions))
        };
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("session-{id}.json"));
        write_actions(&path, &actions)?;
        info!(
            session = %id,
            actions = actions.len(),
            path = %path.display(),
            "recording session saved"
        );
        Ok(path)
    }

    /// Writes the current session without closing it.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), RecorderError> {
        let actions = self.actions();
        write_actions(path.as_ref(), &actions)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Vec<RecordedAction>, RecorderError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn write_actions(path: &Path, actions: &[RecordedAction]) -> Result<(), RecorderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(actions)?)?;
    Ok(())
}
