//! Error types for selector synthesis

use cdp_adapter::AdapterError;
use thiserror::Error;

/// Locator error enumeration
#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    /// No element at the requested point / nothing focused
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    /// The in-page probe returned something we could not decode
    #[error("Malformed probe result: {0}")]
    MalformedProbe(String),

    /// CDP communication error
    #[error("CDP error: {0}")]
    CdpError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LocatorError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, LocatorError::CdpError(_))
    }

    /// Get error severity (0=low, 1=medium, 2=high, 3=critical)
    pub fn severity(&self) -> u8 {
        match self {
            LocatorError::Internal(_) => 3,
            LocatorError::CdpError(_) => 2,
            LocatorError::MalformedProbe(_) => 1,
            LocatorError::ElementNotFound(_) => 0,
        }
    }
}

impl From<AdapterError> for LocatorError {
    fn from(err: AdapterError) -> Self {
        LocatorError::CdpError(err.to_string())
    }
}
