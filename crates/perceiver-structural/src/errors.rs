use cdp_adapter::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerceiverError {
    #[error("driver error: {0}")]
    Driver(#[from] AdapterError),
    #[error("malformed accessibility snapshot: {0}")]
    MalformedSnapshot(String),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PerceiverError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
