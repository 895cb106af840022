//! Model client port.
//!
//! The pipeline talks to language models only through [`LlmClient`]. A request
//! carries a [`ResponseContract`] describing how the answer must be shaped
//! (tool call, JSON schema or free text); the response exposes the parsed
//! structured payload, tool calls and token usage.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use waypoint_core_types::TokenUsage;

use crate::errors::AgentError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A callable tool offered to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool arguments.
    pub parameters: Value,
}

/// Shape the model's answer must take.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResponseContract {
    /// Answer through one of `tools`; `required` forbids plain-text replies.
    Tools { tools: Vec<ToolSpec>, required: bool },
    /// Answer with a JSON document matching `schema`.
    Schema { name: String, schema: Value },
    FreeForm,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionOptions {
    pub messages: Vec<ChatMessage>,
    pub contract: ResponseContract,
    pub temperature: f32,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Decoded argument object. Providers that ship arguments as a JSON string
    /// are decoded before this point.
    pub arguments: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub message: AssistantMessage,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    /// Structured payload for schema-constrained requests.
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl ChatCompletionResponse {
    /// Response carrying a structured payload.
    pub fn with_data(data: Value, usage: TokenUsage) -> Self {
        Self {
            data: Some(data),
            usage: Some(usage),
            choices: Vec::new(),
        }
    }

    /// Response whose first choice holds a single tool call.
    pub fn with_tool_call(name: impl Into<String>, arguments: Value, usage: TokenUsage) -> Self {
        Self {
            data: None,
            usage: Some(usage),
            choices: vec![Choice {
                message: AssistantMessage {
                    content: None,
                    tool_calls: vec![ToolCall {
                        id: String::new(),
                        name: name.into(),
                        arguments,
                    }],
                },
            }],
        }
    }

    /// Response with no payload and no tool calls.
    pub fn empty(usage: TokenUsage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.choices
            .iter()
            .flat_map(|choice| choice.message.tool_calls.iter())
    }

    pub fn first_tool_call(&self) -> Option<&ToolCall> {
        self.tool_calls().next()
    }

    pub fn text(&self) -> Option<&str> {
        self.choices
            .iter()
            .find_map(|choice| choice.message.content.as_deref())
    }

    pub fn usage_or_default(&self) -> TokenUsage {
        self.usage.unwrap_or_default()
    }
}

/// Model client port.
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model_name(&self) -> &str;

    async fn create_chat_completion(
        &self,
        options: ChatCompletionOptions,
    ) -> Result<ChatCompletionResponse, AgentError>;
}

#[async_trait]
impl<T: LlmClient + ?Sized> LlmClient for Arc<T> {
    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    async fn create_chat_completion(
        &self,
        options: ChatCompletionOptions,
    ) -> Result<ChatCompletionResponse, AgentError> {
        (**self).create_chat_completion(options).await
    }
}

enum Scripted {
    Reply(ChatCompletionResponse),
    Fail(String),
}

/// Scripted client for tests and offline runs.
///
/// Replies are served in FIFO order; once the queue drains every call answers
/// with an empty response.
pub struct MockLlmClient {
    model: String,
    latency: Option<Duration>,
    queue: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ChatCompletionOptions>>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            latency: None,
            queue: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call sleeps for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn push_response(&self, response: ChatCompletionResponse) {
        self.queue.lock().push_back(Scripted::Reply(response));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.queue.lock().push_back(Scripted::Fail(message.into()));
    }

    /// Requests observed so far, oldest first.
    pub fn requests(&self) -> Vec<ChatCompletionOptions> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().len()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn create_chat_completion(
        &self,
        options: ChatCompletionOptions,
    ) -> Result<ChatCompletionResponse, AgentError> {
        self.requests.lock().push(options);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self.queue.lock().pop_front();
        match next {
            Some(Scripted::Reply(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(AgentError::provider(message)),
            None => Ok(ChatCompletionResponse::default()),
        }
    }
}

/// In-memory response cache in front of another client.
///
/// Keys are the serialized request without its `request_id`, so identical
/// prompts issued by different steps share an entry. Failed calls are never
/// cached.
pub struct CachingLlmClient<C> {
    inner: C,
    entries: Mutex<HashMap<String, ChatCompletionResponse>>,
}

impl<C: LlmClient> CachingLlmClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn cache_key(&self, options: &ChatCompletionOptions) -> Result<String, AgentError> {
        let mut value = serde_json::to_value(options)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("request_id");
        }
        Ok(format!("{}:{}", self.inner.model_name(), value))
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for CachingLlmClient<C> {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn create_chat_completion(
        &self,
        options: ChatCompletionOptions,
    ) -> Result<ChatCompletionResponse, AgentError> {
        let key = self.cache_key(&options)?;
        if let Some(hit) = self.entries.lock().get(&key).cloned() {
            debug!(request_id = %options.request_id, "llm cache hit");
            return Ok(hit);
        }
        let contract = options.contract.clone();
        let response = self.inner.create_chat_completion(options).await?;
        if is_cacheable(&contract, &response) {
            self.entries.lock().insert(key, response.clone());
        } else {
            debug!("llm response not cached: no usable payload");
        }
        Ok(response)
    }
}

/// Replies the caller would retry on are never stored.
fn is_cacheable(contract: &ResponseContract, response: &ChatCompletionResponse) -> bool {
    match contract {
        ResponseContract::Tools { .. } => response.first_tool_call().is_some(),
        _ => response.data.is_some() || response.text().is_some_and(|t| !t.trim().is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(request_id: &str) -> ChatCompletionOptions {
        ChatCompletionOptions {
            messages: vec![ChatMessage::user("hello")],
            contract: ResponseContract::FreeForm,
            temperature: 0.1,
            request_id: request_id.to_string(),
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn mock_serves_queue_then_empty() {
        let mock = MockLlmClient::new();
        mock.push_response(ChatCompletionResponse::with_data(
            json!({"ok": true}),
            TokenUsage::new(1, 1),
        ));
        let first = mock.create_chat_completion(options("a")).await.unwrap();
        assert_eq!(first.data, Some(json!({"ok": true})));
        let second = mock.create_chat_completion(options("b")).await.unwrap();
        assert!(second.data.is_none());
        assert_eq!(second.tool_calls().count(), 0);
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn mock_errors_are_provider_errors() {
        let mock = MockLlmClient::new();
        mock.push_error("boom");
        let err = mock.create_chat_completion(options("a")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn cache_ignores_request_id() {
        let mock = MockLlmClient::new();
        mock.push_response(ChatCompletionResponse::with_data(
            json!({"n": 1}),
            TokenUsage::new(3, 2),
        ));
        let cached = CachingLlmClient::new(mock);
        let first = cached.create_chat_completion(options("a")).await.unwrap();
        let second = cached.create_chat_completion(options("b")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cached.inner().requests().len(), 1);
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn cache_skips_replies_without_tool_call() {
        let mock = MockLlmClient::new();
        mock.push_response(ChatCompletionResponse::empty(TokenUsage::new(1, 0)));
        mock.push_response(ChatCompletionResponse::with_tool_call(
            "doAction",
            json!({}),
            TokenUsage::new(2, 1),
        ));
        let cached = CachingLlmClient::new(mock);
        let mut request = options("a");
        request.contract = ResponseContract::Tools {
            tools: Vec::new(),
            required: true,
        };

        let first = cached.create_chat_completion(request.clone()).await.unwrap();
        assert!(first.first_tool_call().is_none());
        assert!(cached.is_empty());

        let second = cached.create_chat_completion(request.clone()).await.unwrap();
        assert!(second.first_tool_call().is_some());
        let third = cached.create_chat_completion(request).await.unwrap();
        assert_eq!(second, third);
        assert_eq!(cached.inner().requests().len(), 2);
        assert_eq!(cached.len(), 1);
    }

    #[test]
    fn contract_serializes_with_kind_tag() {
        let contract = ResponseContract::Schema {
            name: "Verify".into(),
            schema: json!({"type": "object"}),
        };
        let value = serde_json::to_value(&contract).unwrap();
        assert_eq!(value["kind"], "schema");
    }
}
