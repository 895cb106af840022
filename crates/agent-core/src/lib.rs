//! Model orchestration for Waypoint.
//!
//! Turns a goal plus a simplified accessibility tree into element actions,
//! element listings, structured extractions and completion verdicts through a
//! pluggable [`LlmClient`].

pub mod errors;
pub mod inference;
pub mod inference_log;
pub mod llm;
pub mod openai;
pub mod prompts;
pub mod utils;

pub use errors::AgentError;
pub use inference::{
    ActDecision, ActOutcome, ActParams, ExtractMetadata, ExtractOutcome, ExtractParams,
    InferencePipeline, ObserveOutcome, ObserveParams, ObservedElement, PipelineConfig,
    VerifyOutcome, VerifyParams, VerifyVerdict,
};
pub use inference_log::{summarize, CallTotals, InferenceLog, InferenceSummary, SummaryRow};
pub use llm::{
    CachingLlmClient, ChatCompletionOptions, ChatCompletionResponse, ChatMessage, LlmClient,
    MockLlmClient, ResponseContract, Role, ToolCall, ToolSpec,
};
pub use openai::{OpenAiCompatibleClient, OpenAiConfig};
