//! Staged inference pipeline.
//!
//! Four entry points share one call path ([`InferencePipeline::call`]) that
//! times the request, accumulates usage and writes the optional audit log.
//! A model that answers with nothing usable yields an empty outcome; only
//! transport failures surface as [`AgentError`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use waypoint_core_types::TokenUsage;

use crate::errors::AgentError;
use crate::inference_log::InferenceLog;
use crate::llm::{
    ChatCompletionOptions, ChatCompletionResponse, ChatMessage, LlmClient, ResponseContract,
};
use crate::prompts::{self, ACT_TOOL, SKIP_TOOL};
use crate::utils::{coerce_string, coerce_string_list, parse_json_payload};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Extra act attempts after a reply without a tool call.
    pub act_max_retries: u32,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            act_max_retries: 2,
            temperature: 0.1,
            max_tokens: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ActParams {
    pub goal: String,
    /// Rendered history of earlier steps, one per line.
    pub steps: String,
    pub dom_elements: String,
    pub variables: BTreeMap<String, String>,
    pub request_id: String,
}

/// Parsed arguments of a `doAction` tool call, placeholders already substituted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActDecision {
    pub method: String,
    pub element: String,
    pub arguments: Vec<String>,
    pub step: String,
    #[serde(default)]
    pub why: Option<String>,
    pub completed: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActOutcome {
    pub decision: Option<ActDecision>,
    /// Reason given by the model when it chose to skip this page.
    pub skipped: Option<String>,
    pub attempts: u32,
    pub usage: TokenUsage,
    pub inference_time_ms: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ObserveParams {
    pub instruction: String,
    pub dom_elements: String,
    /// Ask for a method and arguments per element.
    pub return_action: bool,
    pub request_id: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedElement {
    pub element_id: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObserveOutcome {
    pub elements: Vec<ObservedElement>,
    pub usage: TokenUsage,
    pub inference_time_ms: u64,
}

#[derive(Clone, Debug, Default)]
pub struct ExtractParams {
    pub instruction: String,
    pub dom_elements: String,
    /// Result of earlier chunks; `Null` on the first chunk.
    pub previously_extracted: Value,
    pub chunks_seen: usize,
    pub chunks_total: usize,
    pub request_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractMetadata {
    pub progress: String,
    pub completed: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExtractOutcome<T> {
    /// Refined payload decoded as `T`, or `None` when neither stage produced it.
    pub data: Option<T>,
    /// Refined payload as returned by the model.
    pub raw: Value,
    pub metadata: ExtractMetadata,
    pub usage: TokenUsage,
    pub inference_time_ms: u64,
}

impl<T> ExtractOutcome<T> {
    /// Refined data with `metadata` and the accounting fields folded in.
    pub fn merged(&self) -> Value {
        let mut map = match &self.raw {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".into(), other.clone());
                map
            }
        };
        map.insert("metadata".into(), json!(self.metadata));
        map.insert("prompt_tokens".into(), json!(self.usage.prompt_tokens));
        map.insert(
            "completion_tokens".into(),
            json!(self.usage.completion_tokens),
        );
        map.insert("inference_time_ms".into(), json!(self.inference_time_ms));
        Value::Object(map)
    }
}

#[derive(Clone, Debug, Default)]
pub struct VerifyParams {
    pub goal: String,
    pub steps: String,
    pub dom_elements: String,
    pub request_id: String,
}

/// How the completion check was decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyVerdict {
    Confirmed,
    Denied,
    /// Payload was an object without `completed`.
    MissingField,
    /// No payload, a non-object payload, or a non-boolean `completed`.
    Malformed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VerifyOutcome {
    pub completed: bool,
    pub verdict: VerifyVerdict,
    pub usage: TokenUsage,
    pub inference_time_ms: u64,
}

impl VerifyVerdict {
    pub fn classify(payload: Option<&Value>) -> Self {
        match payload {
            Some(Value::Object(map)) => match map.get("completed") {
                None => VerifyVerdict::MissingField,
                Some(Value::Bool(true)) => VerifyVerdict::Confirmed,
                Some(Value::Bool(false)) => VerifyVerdict::Denied,
                Some(_) => VerifyVerdict::Malformed,
            },
            _ => VerifyVerdict::Malformed,
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, VerifyVerdict::Confirmed)
    }
}

pub struct InferencePipeline<C> {
    client: C,
    config: PipelineConfig,
    log: Option<InferenceLog>,
    sequence: AtomicU64,
}

struct Timed {
    response: ChatCompletionResponse,
    usage: TokenUsage,
    elapsed_ms: u64,
}

impl<C: LlmClient> InferencePipeline<C> {
    pub fn new(client: C) -> Self {
        Self::with_config(client, PipelineConfig::default())
    }

    pub fn with_config(client: C, config: PipelineConfig) -> Self {
        Self {
            client,
            config,
            log: None,
            sequence: AtomicU64::new(0),
        }
    }

    /// Persist every call's request and response.
    pub fn with_log(mut self, log: InferenceLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn log(&self) -> Option<&InferenceLog> {
        self.log.as_ref()
    }

    /// Choose one element action toward `params.goal`.
    pub async fn act(&self, params: &ActParams) -> Result<ActOutcome, AgentError> {
        let request_id = self.request_id(&params.request_id, "act");
        let mut messages = prompts::act_messages(
            &params.goal,
            &params.steps,
            &params.dom_elements,
            &params.variables,
        );
        let contract = ResponseContract::Tools {
            tools: prompts::act_tools(),
            required: true,
        };

        let max_attempts = self.config.act_max_retries + 1;
        let mut outcome = ActOutcome::default();
        let mut diagnostics: Vec<String> = Vec::new();
        for attempt in 1..=max_attempts {
            outcome.attempts = attempt;
            let timed = self
                .call("act", &request_id, messages.clone(), contract.clone())
                .await?;
            outcome.usage += timed.usage;
            outcome.inference_time_ms += timed.elapsed_ms;

            match timed.response.first_tool_call() {
                Some(call) if call.name == SKIP_TOOL => {
                    let reason = call
                        .arguments
                        .get("reason")
                        .and_then(coerce_string)
                        .unwrap_or_default();
                    info!(request_id = %request_id, reason = %reason, "model skipped section");
                    outcome.skipped = Some(reason);
                    return Ok(outcome);
                }
                Some(call) if call.name == ACT_TOOL => {
                    match parse_decision(&call.arguments, &params.variables) {
                        Some(decision) => {
                            debug!(
                                request_id = %request_id,
                                method = %decision.method,
                                element = %decision.element,
                                attempt,
                                "act decision"
                            );
                            outcome.decision = Some(decision);
                            return Ok(outcome);
                        }
                        None => {
                            diagnostics.push(format!("unusable {ACT_TOOL} arguments"))
                        }
                    }
                }
                Some(call) => diagnostics.push(format!("unknown tool {}", call.name)),
                None => diagnostics.push("no tool call".to_string()),
            }
            if let Some(last) = diagnostics.last().filter(|_| attempt < max_attempts) {
                debug!(request_id = %request_id, attempt, reason = %last, "act attempt rejected");
                messages.push(prompts::act_retry_message(attempt, last));
            }
        }

        warn!(
            request_id = %request_id,
            attempts = max_attempts,
            diagnostics = ?diagnostics,
            "act gave up without a tool call"
        );
        Ok(outcome)
    }

    /// List elements matching an instruction.
    pub async fn observe(&self, params: &ObserveParams) -> Result<ObserveOutcome, AgentError> {
        let request_id = self.request_id(&params.request_id, "observe");
        let timed = self
            .call(
                "observe",
                &request_id,
                prompts::observe_messages(
                    &params.instruction,
                    &params.dom_elements,
                    params.return_action,
                ),
                ResponseContract::Schema {
                    name: "Observation".to_string(),
                    schema: prompts::observe_schema(params.return_action),
                },
            )
            .await?;

        let elements = structured(&timed.response)
            .map(|payload| parse_observed(&payload, params.return_action))
            .unwrap_or_else(|| {
                warn!(request_id = %request_id, "observe response carried no payload");
                Vec::new()
            });
        Ok(ObserveOutcome {
            elements,
            usage: timed.usage,
            inference_time_ms: timed.elapsed_ms,
        })
    }

    /// Extract, refine and judge progress in three sequential calls.
    pub async fn extract<T>(&self, params: &ExtractParams) -> Result<ExtractOutcome<T>, AgentError>
    where
        T: DeserializeOwned + JsonSchema,
    {
        let request_id = self.request_id(&params.request_id, "extract");
        let schema = serde_json::to_value(schemars::schema_for!(T))?;
        let previous = match &params.previously_extracted {
            Value::Null => json!({}),
            other => other.clone(),
        };
        let mut usage = TokenUsage::default();
        let mut elapsed_ms = 0;

        let extracted = self
            .call(
                "extract",
                &request_id,
                prompts::extract_messages(&params.instruction, &previous, &params.dom_elements),
                ResponseContract::Schema {
                    name: "Extraction".to_string(),
                    schema: schema.clone(),
                },
            )
            .await?;
        usage += extracted.usage;
        elapsed_ms += extracted.elapsed_ms;
        let extracted = structured(&extracted.response).unwrap_or(Value::Null);

        let refined = self
            .call(
                "refine",
                &request_id,
                prompts::refine_messages(&params.instruction, &previous, &extracted),
                ResponseContract::Schema {
                    name: "Extraction".to_string(),
                    schema,
                },
            )
            .await?;
        usage += refined.usage;
        elapsed_ms += refined.elapsed_ms;
        let refined = structured(&refined.response).unwrap_or_else(|| extracted.clone());

        let metadata_call = self
            .call(
                "metadata",
                &request_id,
                prompts::metadata_messages(
                    &params.instruction,
                    &refined,
                    params.chunks_seen,
                    params.chunks_total,
                ),
                ResponseContract::Schema {
                    name: "Metadata".to_string(),
                    schema: prompts::metadata_schema(),
                },
            )
            .await?;
        usage += metadata_call.usage;
        elapsed_ms += metadata_call.elapsed_ms;
        let metadata = structured(&metadata_call.response)
            .map(|payload| parse_metadata(&payload))
            .unwrap_or_default();

        let data = serde_json::from_value::<T>(refined.clone())
            .or_else(|_| serde_json::from_value::<T>(extracted))
            .map_err(|err| {
                warn!(request_id = %request_id, error = %err, "extraction does not match schema");
            })
            .ok();

        Ok(ExtractOutcome {
            data,
            raw: refined,
            metadata,
            usage,
            inference_time_ms: elapsed_ms,
        })
    }

    /// Ask whether the goal has been reached. Never fails on a bad payload.
    pub async fn verify_act_completion(
        &self,
        params: &VerifyParams,
    ) -> Result<VerifyOutcome, AgentError> {
        let request_id = self.request_id(&params.request_id, "verify");
        let timed = self
            .call(
                "verify",
                &request_id,
                prompts::verify_messages(&params.goal, &params.steps, &params.dom_elements),
                ResponseContract::Schema {
                    name: "Verification".to_string(),
                    schema: prompts::verify_schema(),
                },
            )
            .await?;

        let payload = structured(&timed.response);
        let verdict = VerifyVerdict::classify(payload.as_ref());
        if matches!(
            verdict,
            VerifyVerdict::MissingField | VerifyVerdict::Malformed
        ) {
            warn!(request_id = %request_id, verdict = ?verdict, "verification payload unusable");
        }
        Ok(VerifyOutcome {
            completed: verdict.is_completed(),
            verdict,
            usage: timed.usage,
            inference_time_ms: timed.elapsed_ms,
        })
    }

    async fn call(
        &self,
        call_type: &str,
        request_id: &str,
        messages: Vec<ChatMessage>,
        contract: ResponseContract,
    ) -> Result<Timed, AgentError> {
        let options = ChatCompletionOptions {
            messages,
            contract,
            temperature: self.config.temperature,
            request_id: request_id.to_string(),
            max_tokens: self.config.max_tokens,
        };
        let logged_request = self
            .log
            .as_ref()
            .and_then(|_| serde_json::to_value(&options).ok());

        let started = Instant::now();
        let response = self.client.create_chat_completion(options).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let usage = response.usage_or_default();
        debug!(
            call_type,
            request_id,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            elapsed_ms,
            "model call finished"
        );

        if let (Some(log), Some(request)) = (self.log.as_ref(), logged_request) {
            let response_json = serde_json::to_value(&response).unwrap_or(Value::Null);
            if let Err(err) = log.record(call_type, &request, &response_json, usage, elapsed_ms) {
                warn!(call_type, error = %err, "failed to write inference log");
            }
        }

        Ok(Timed {
            response,
            usage,
            elapsed_ms,
        })
    }

    fn request_id(&self, supplied: &str, call_type: &str) -> String {
        if !supplied.is_empty() {
            return supplied.to_string();
        }
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{call_type}-{n}")
    }
}

/// Structured payload, falling back to JSON embedded in the text content.
fn structured(response: &ChatCompletionResponse) -> Option<Value> {
    response
        .data
        .clone()
        .or_else(|| response.text().and_then(parse_json_payload))
}

fn parse_decision(arguments: &Value, variables: &BTreeMap<String, String>) -> Option<ActDecision> {
    let method = arguments.get("method").and_then(coerce_string)?;
    let element = arguments.get("element").and_then(coerce_string)?;
    if method.trim().is_empty() || element.trim().is_empty() {
        return None;
    }
    let arguments_list = arguments
        .get("arguments")
        .map(coerce_string_list)
        .unwrap_or_default()
        .into_iter()
        .map(|arg| prompts::substitute_variables(&arg, variables))
        .collect();
    Some(ActDecision {
        method: method.trim().to_string(),
        element: element.trim().to_string(),
        arguments: arguments_list,
        step: arguments
            .get("step")
            .and_then(coerce_string)
            .unwrap_or_default(),
        why: arguments.get("why").and_then(coerce_string),
        completed: coerce_bool(arguments.get("completed")),
    })
}

fn parse_observed(payload: &Value, return_action: bool) -> Vec<ObservedElement> {
    let items = match payload.get("elements") {
        Some(Value::Array(items)) => items.as_slice(),
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| {
            let element_id = item.get("elementId").and_then(coerce_string)?;
            let description = item
                .get("description")
                .and_then(coerce_string)
                .unwrap_or_default();
            let (method, arguments) = if return_action {
                (
                    item.get("method").and_then(coerce_string),
                    Some(
                        item.get("arguments")
                            .map(coerce_string_list)
                            .unwrap_or_default(),
                    ),
                )
            } else {
                (None, None)
            };
            Some(ObservedElement {
                element_id,
                description,
                method,
                arguments,
            })
        })
        .collect()
}

fn parse_metadata(payload: &Value) -> ExtractMetadata {
    ExtractMetadata {
        progress: payload
            .get("progress")
            .and_then(coerce_string)
            .unwrap_or_default(),
        completed: coerce_bool(payload.get("completed")),
    }
}

fn coerce_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text.eq_ignore_ascii_case("true"),
        _ => false,
    }
}
