use thiserror::Error;

/// Errors emitted by the agent-core crate.
///
/// A model that answers with nothing useful is not an error: the pipeline maps
/// that case onto empty outcomes. These variants cover transport and local I/O.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Raised when a pipeline request is malformed or missing required fields.
    #[error("invalid inference request: {0}")]
    InvalidRequest(String),

    /// The model endpoint could not be reached or answered with a failure status.
    #[error("llm provider error: {0}")]
    Provider(String),

    /// The provider answered but the envelope could not be decoded.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// Inference audit log could not be written or read.
    #[error("inference log error: {0}")]
    Log(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl AgentError {
    /// Helper for wrapping static string errors.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::Provider(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse(message.into())
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self::Log(message.into())
    }

    /// Transport failures are worth another attempt; decoding failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Provider(_))
    }
}

impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Log(err.to_string())
    }
}

impl From<csv::Error> for AgentError {
    fn from(err: csv::Error) -> Self {
        AgentError::Log(err.to_string())
    }
}
