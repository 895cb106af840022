use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// High-level error categories surfaced by the driver.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterErrorKind {
    #[error("navigation timed out")]
    NavTimeout,
    #[error("cdp i/o failure")]
    CdpIo,
    #[error("target not found")]
    TargetNotFound,
    #[error("page script failed")]
    Script,
    #[error("internal error")]
    Internal,
}

/// Driver error carrying the protocol's original message in `hint`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub hint: Option<String>,
    pub retriable: bool,
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(hint) = &self.hint {
            write!(f, ": {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind) -> Self {
        Self {
            kind,
            hint: None,
            retriable: false,
            data: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn retriable(mut self, flag: bool) -> Self {
        self.retriable = flag;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Script).with_hint(message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AdapterErrorKind::Internal).with_hint(message)
    }

    /// Builds an error for a response that lacks a field the caller relies on.
    pub fn missing_field(method: &str, field: &str) -> Self {
        Self::new(AdapterErrorKind::CdpIo).with_hint(format!("{method} response missing '{field}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_hint() {
        let err = AdapterError::script("ReferenceError: foo is not defined");
        assert_eq!(
            err.to_string(),
            "page script failed: ReferenceError: foo is not defined"
        );
        assert!(!err.retriable);
    }
}
