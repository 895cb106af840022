//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};
use waypoint_core_types::TokenUsage;

use crate::errors::AgentError;
use crate::llm::{
    AssistantMessage, ChatCompletionOptions, ChatCompletionResponse, Choice, LlmClient,
    ResponseContract, ToolCall,
};
use crate::utils::parse_json_payload;

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Tried in order; a 429 moves on to the next key.
    pub api_keys: Vec<String>,
    pub model: String,
    pub api_base: String,
    pub timeout: Duration,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_keys: vec![api_key.into()],
            model: model.into(),
            api_base: "https://api.openai.com/v1".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

pub struct OpenAiCompatibleClient {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiCompatibleClient {
    pub fn new(config: OpenAiConfig) -> Result<Self, AgentError> {
        if config.api_keys.iter().all(|key| key.trim().is_empty()) {
            return Err(AgentError::invalid_request("missing API key for model client"));
        }
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| AgentError::provider(format!("failed to build HTTP client: {err}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn create_chat_completion(
        &self,
        options: ChatCompletionOptions,
    ) -> Result<ChatCompletionResponse, AgentError> {
        let url = self.endpoint();
        let body = build_request_body(&self.config.model, &options);

        let keys: Vec<&String> = self
            .config
            .api_keys
            .iter()
            .filter(|key| !key.trim().is_empty())
            .collect();
        let mut last_error: Option<AgentError> = None;
        for (index, key) in keys.iter().enumerate() {
            let response = match self
                .client
                .post(&url)
                .bearer_auth(key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(err) => {
                    last_error = Some(AgentError::provider(format!("request failed: {err}")));
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "<response unavailable>".to_string());
                if status.as_u16() == 429 && index + 1 < keys.len() {
                    let friendly = rate_limit_message(&text);
                    warn!(
                        target: "openai",
                        message = %friendly,
                        attempt = index + 1,
                        remaining = keys.len() - index - 1,
                        request_id = %options.request_id,
                        "rate limited; switching API key"
                    );
                    last_error = Some(AgentError::provider(friendly));
                    continue;
                }
                return Err(AgentError::provider(format!(
                    "provider returned {status}: {text}"
                )));
            }

            let raw: RawCompletion = response
                .json()
                .await
                .map_err(|err| AgentError::malformed(format!("response invalid: {err}")))?;
            debug!(
                target: "openai",
                request_id = %options.request_id,
                choices = raw.choices.len(),
                "chat completion received"
            );
            return Ok(into_response(raw, &options.contract));
        }

        Err(last_error.unwrap_or_else(|| AgentError::provider("all API keys exhausted")))
    }
}

fn build_request_body(model: &str, options: &ChatCompletionOptions) -> RawRequest {
    let mut body = RawRequest {
        model: model.to_string(),
        messages: options.messages.clone(),
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        tools: None,
        tool_choice: None,
        response_format: None,
    };
    match &options.contract {
        ResponseContract::Tools { tools, required } => {
            body.tools = Some(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.parameters,
                            }
                        })
                    })
                    .collect(),
            );
            body.tool_choice = Some(if *required { "required" } else { "auto" }.to_string());
        }
        ResponseContract::Schema { name, schema } => {
            body.response_format = Some(json!({
                "type": "json_schema",
                "json_schema": { "name": name, "schema": schema, "strict": false }
            }));
        }
        ResponseContract::FreeForm => {}
    }
    body
}

fn into_response(raw: RawCompletion, contract: &ResponseContract) -> ChatCompletionResponse {
    let choices: Vec<Choice> = raw
        .choices
        .into_iter()
        .map(|choice| Choice {
            message: AssistantMessage {
                content: choice.message.content.and_then(|content| content.as_text()),
                tool_calls: choice
                    .message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|call| ToolCall {
                        arguments: decode_arguments(&call.function.name, &call.function.arguments),
                        id: call.id,
                        name: call.function.name,
                    })
                    .collect(),
            },
        })
        .collect();

    let data = match contract {
        ResponseContract::Schema { .. } => choices
            .iter()
            .find_map(|choice| choice.message.content.as_deref())
            .and_then(parse_json_payload),
        _ => None,
    };

    ChatCompletionResponse {
        data,
        usage: raw
            .usage
            .map(|usage| TokenUsage::new(usage.prompt_tokens, usage.completion_tokens)),
        choices,
    }
}

fn decode_arguments(tool: &str, raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(target: "openai", tool, error = %err, "tool arguments are not valid JSON");
            Value::Null
        }
    }
}

fn rate_limit_message(raw: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(raw)
        .ok()
        .and_then(|envelope| envelope.error.message)
        .map(|message| format!("rate limit exceeded: {}", message.trim()))
        .unwrap_or_else(|| "rate limit exceeded; retry later".to_string())
}

#[derive(Debug, Serialize)]
struct RawRequest {
    model: String,
    messages: Vec<crate::llm::ChatMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawCompletion {
    #[serde(default)]
    choices: Vec<RawChoice>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
struct RawChoice {
    message: RawMessage,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Option<RawContent>,
    #[serde(default)]
    tool_calls: Option<Vec<RawToolCall>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawContent {
    Text(String),
    Parts(Vec<RawPart>),
}

impl RawContent {
    fn as_text(self) -> Option<String> {
        match self {
            RawContent::Text(text) => Some(text),
            RawContent::Parts(parts) => {
                let text = parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("\n");
                (!text.is_empty()).then_some(text)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawToolCall {
    #[serde(default)]
    id: String,
    function: RawFunction,
}

#[derive(Debug, Deserialize)]
struct RawFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct RawUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: Option<String>,
}
