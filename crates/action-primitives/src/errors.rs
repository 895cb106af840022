//! Error types for action execution and recording

use cdp_adapter::{AdapterError, AdapterErrorKind};
use thiserror::Error;

/// Errors surfaced by the action executor
#[derive(Debug, Error, Clone)]
pub enum ActionError {
    /// Navigation timed out waiting for page load
    #[error("Navigation timeout: {0}")]
    NavTimeout(String),

    /// Selector or point did not resolve to an element
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// Dropdown option was not found
    #[error("Option not found in dropdown: {0}")]
    OptionNotFound(String),

    /// Element method name is not one we can dispatch
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Function action names an unknown primitive
    #[error("Unsupported function: {0}")]
    UnsupportedFunction(String),

    /// Action fields are present but unusable (empty drag path, bad percentage)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Page script threw
    #[error("Script error: {0}")]
    Script(String),

    /// CDP communication or protocol error
    #[error("CDP I/O error: {0}")]
    CdpIo(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ActionError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ActionError::NavTimeout(_) | ActionError::ElementNotFound(_) | ActionError::CdpIo(_)
        )
    }

    /// Get error severity level (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            ActionError::Internal(_) => 3,
            ActionError::NavTimeout(_) | ActionError::CdpIo(_) => 2,
            ActionError::ElementNotFound(_)
            | ActionError::OptionNotFound(_)
            | ActionError::Script(_) => 1,
            _ => 0,
        }
    }
}

impl From<AdapterError> for ActionError {
    fn from(err: AdapterError) -> Self {
        let message = err.to_string();
        match err.kind {
            AdapterErrorKind::NavTimeout => ActionError::NavTimeout(message),
            AdapterErrorKind::TargetNotFound => ActionError::ElementNotFound(message),
            AdapterErrorKind::Script => ActionError::Script(message),
            AdapterErrorKind::CdpIo => ActionError::CdpIo(message),
            AdapterErrorKind::Internal => ActionError::Internal(message),
        }
    }
}

/// Errors from persisting or loading a recorded session
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("session file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// `end_session` without a matching `start_session`
    #[error("no active recording session")]
    NoSession,
}
