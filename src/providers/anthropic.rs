//! Anthropic Messages API adapter.
//!
//! Translates between the router's normalized shapes and Anthropic's
//! [`/v1/messages`](https://docs.anthropic.com/en/api/messages) API.
//!
//! # Protocol differences handled here
//!
//! | Concern | Chat-completions | Anthropic |
//! |---|---|---|
//! | System prompt | Message with `role: "system"` | Top-level `system` field |
//! | Max tokens | Optional | **Required** (`max_tokens`) |
//! | Finish reasons | `"stop"`, `"length"`, `"tool_calls"` | `"end_turn"`, `"max_tokens"`, `"tool_use"` |
//! | Tool definitions | `tools[].function.parameters` | `tools[].input_schema` |
//! | Response shape | `choices[].message` | `content[]` typed blocks |
//! | Auth header | `Authorization: Bearer …` | `x-api-key: …` |
//! | Stream frames | `choices[].delta` | typed events (`content_block_delta`, …) |

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt as _;
use reqwest::{header, Client};
use serde_json::{json, Value};

use crate::breaker::BreakerMode;
use crate::error::{ErrorKind, RouterError};
use crate::types::{
    estimate_tokens, ChatMessage, NormalizedResponse, Prompt, RequestOptions, Role,
    StreamingChunk, TokenUsage, ToolCall,
};

use super::{
    classify_http, classify_transport, retry_after_ms, wire, AdapterDetails, AdapterRuntime,
    ChunkStream, ProviderAdapter,
};

const PROVIDER: &str = "anthropic";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const CONTEXT_WINDOW: u32 = 200_000;

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Model used for the cheap availability probe.
const PROBE_MODEL: &str = "claude-3-5-haiku-latest";

/// Adapter for the Anthropic Messages API.
pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
    runtime: Arc<AdapterRuntime>,
}

impl AnthropicAdapter {
    /// Build an Anthropic adapter with the given API key.
    pub fn new(base_url: Option<String>, api_key: String, runtime: Arc<AdapterRuntime>) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "x-api-key",
            header::HeaderValue::from_str(&api_key)
                .expect("Anthropic API key contains invalid header characters"),
        );
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .expect("failed to build reqwest client");

        Self {
            client,
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            runtime,
        }
    }

    async fn post_messages(&self, body: &Value, timeout_ms: u64) -> Result<Value, RouterError> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_millis(timeout_ms))
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(PROVIDER, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http(PROVIDER, status.as_u16(), &text, retry_after));
        }
        response
            .json()
            .await
            .map_err(|e| classify_transport(PROVIDER, &e))
    }

    async fn post_messages_stream(&self, body: &Value) -> Result<reqwest::Response, RouterError> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_transport(PROVIDER, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_ms(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http(PROVIDER, status.as_u16(), &text, retry_after));
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    /// Probe with a minimal 1-token request.
    ///
    /// There is no `/v1/models` endpoint, so a cheap inference call is the
    /// only reliable way to verify auth + connectivity.
    async fn is_available(&self) -> bool {
        let probe = json!({
            "model": PROBE_MODEL,
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "ping" }],
        });
        let url = format!("{}/v1/messages", self.base_url);
        matches!(
            self.client
                .post(&url)
                .timeout(Duration::from_secs(5))
                .json(&probe)
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }

    fn capabilities(&self) -> Vec<String> {
        [
            "text-generation",
            "code-generation",
            "reasoning",
            "knowledge-retrieval",
            "summarization",
            "step-by-step",
            "equation-solving",
            "tool-calling",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn details(&self) -> AdapterDetails {
        AdapterDetails {
            provider: PROVIDER,
            version: ANTHROPIC_VERSION,
            context_window: CONTEXT_WINDOW,
        }
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &Prompt,
        opts: &RequestOptions,
    ) -> Result<NormalizedResponse, RouterError> {
        let messages = wire::build_messages(prompt, opts);
        let body = to_messages_request(model, &messages, opts, false);

        let raw = self
            .runtime
            .call(PROVIDER, model, BreakerMode::Unary, opts, || {
                self.post_messages(&body, opts.timeout_ms)
            })
            .await?;

        from_messages_response(&raw, model, &messages)
    }

    async fn generate_stream(
        &self,
        model: &str,
        prompt: &Prompt,
        opts: &RequestOptions,
    ) -> Result<ChunkStream, RouterError> {
        let messages = wire::build_messages(prompt, opts);
        let body = to_messages_request(model, &messages, opts, true);

        let response = self
            .runtime
            .call(PROVIDER, model, BreakerMode::Stream, opts, || {
                self.post_messages_stream(&body)
            })
            .await?;

        Ok(event_chunk_stream(response))
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Schema translation — pub(crate) for unit testing
// ──────────────────────────────────────────────────────────────────────────────

/// Build a Messages API request from a normalized transcript.
pub(crate) fn to_messages_request(
    model: &str,
    messages: &[ChatMessage],
    opts: &RequestOptions,
    stream: bool,
) -> Value {
    // System content is a top-level field, not a message role. Multiple
    // system turns concatenate.
    let mut system_parts: Vec<&str> = Vec::new();
    let mut out_messages: Vec<Value> = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => {
                if let Some(content) = msg.content.as_deref() {
                    system_parts.push(content);
                }
            }
            Role::Assistant if msg.tool_calls.is_some() => {
                let mut blocks: Vec<Value> = Vec::new();
                if let Some(text) = msg.content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                for call in msg.tool_calls.as_deref().unwrap_or_default() {
                    let input: Value = serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.function.name,
                        "input": input,
                    }));
                }
                out_messages.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool | Role::Function => {
                // Tool results ride as user-side result blocks; the message
                // name carries the originating call id.
                out_messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": msg.name.clone().unwrap_or_default(),
                        "content": msg.content.clone().unwrap_or_default(),
                    }],
                }));
            }
            Role::User | Role::Assistant => {
                let role = if msg.role == Role::User { "user" } else { "assistant" };
                out_messages.push(json!({
                    "role": role,
                    "content": msg.content.clone().unwrap_or_default(),
                }));
            }
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": opts.max_tokens,
        "messages": out_messages,
        "stream": stream,
    });
    if !system_parts.is_empty() {
        body["system"] = Value::String(system_parts.join("\n\n"));
    }
    body["temperature"] = json!(opts.temperature);
    if (opts.top_p - 1.0).abs() > f64::EPSILON {
        body["top_p"] = json!(opts.top_p);
    }
    if !opts.stop.is_empty() {
        body["stop_sequences"] = json!(opts.stop);
    }

    // Tool definitions: chat-completions `function.parameters` becomes
    // `input_schema`. `tool_choice: "none"` means the tools are withheld.
    let choice_is_none = opts.tool_choice.as_ref().is_some_and(|c| *c == "none");
    if let Some(tools) = opts.tools.as_ref().filter(|_| !choice_is_none) {
        if let Some(entries) = tools.as_array() {
            let translated: Vec<Value> = entries
                .iter()
                .filter_map(|t| {
                    let f = t.get("function")?;
                    Some(json!({
                        "name": f["name"],
                        "description": f.get("description").cloned().unwrap_or(Value::Null),
                        "input_schema": f.get("parameters").cloned()
                            .unwrap_or_else(|| json!({"type": "object"})),
                    }))
                })
                .collect();
            if !translated.is_empty() {
                body["tools"] = json!(translated);
            }
        }
        if let Some(choice) = &opts.tool_choice {
            if choice == "auto" {
                body["tool_choice"] = json!({"type": "auto"});
            } else if let Some(name) = choice.pointer("/function/name").and_then(Value::as_str) {
                body["tool_choice"] = json!({"type": "tool", "name": name});
            }
        }
    }

    body
}

fn map_stop_reason(reason: &str) -> &str {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        other => other,
    }
}

/// Normalize a Messages API response.
pub(crate) fn from_messages_response(
    body: &Value,
    requested_model: &str,
    messages: &[ChatMessage],
) -> Result<NormalizedResponse, RouterError> {
    let blocks = body["content"].as_array().ok_or_else(|| {
        RouterError::new(ErrorKind::Internal, "anthropic response has no content array")
            .with_source(PROVIDER)
    })?;

    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    for block in blocks {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(t) = block["text"].as_str() {
                    text.push_str(t);
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    kind: "function".to_string(),
                    function: crate::types::FunctionCall {
                        name: block["name"].as_str().unwrap_or_default().to_string(),
                        arguments: block["input"].to_string(),
                    },
                });
            }
            _ => {}
        }
    }

    let model_used = body["model"]
        .as_str()
        .filter(|m| !m.is_empty())
        .unwrap_or(requested_model)
        .to_string();

    let tokens = match body.get("usage") {
        Some(usage) if usage["input_tokens"].is_u64() || usage["output_tokens"].is_u64() => {
            TokenUsage::new(
                usage["input_tokens"].as_u64().unwrap_or(0) as u32,
                usage["output_tokens"].as_u64().unwrap_or(0) as u32,
            )
        }
        _ => TokenUsage::new(wire::estimate_messages(messages), estimate_tokens(&text)),
    };

    let mut response = NormalizedResponse::new(text, tokens, model_used);
    if !tool_calls.is_empty() {
        response.tool_calls = Some(tool_calls);
    }
    Ok(response)
}

/// Translate one Anthropic SSE event payload into a chunk.
pub(crate) fn translate_event(data: &str) -> Option<StreamingChunk> {
    let event: Value = serde_json::from_str(data).ok()?;
    match event["type"].as_str()? {
        "content_block_start" => {
            let block = &event["content_block"];
            if block["type"] == "tool_use" {
                Some(StreamingChunk::ToolCallDelta {
                    index: event["index"].as_u64().unwrap_or(0) as u32,
                    id: block["id"].as_str().map(String::from),
                    name: block["name"].as_str().map(String::from),
                    arguments_delta: String::new(),
                })
            } else {
                None
            }
        }
        "content_block_delta" => match event.pointer("/delta/type").and_then(Value::as_str)? {
            "text_delta" => {
                let delta = event.pointer("/delta/text")?.as_str()?.to_string();
                if delta.is_empty() {
                    None
                } else {
                    Some(StreamingChunk::Text { delta })
                }
            }
            "input_json_delta" => Some(StreamingChunk::ToolCallDelta {
                index: event["index"].as_u64().unwrap_or(0) as u32,
                id: None,
                name: None,
                arguments_delta: event
                    .pointer("/delta/partial_json")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            _ => None,
        },
        "message_delta" => {
            let reason = event.pointer("/delta/stop_reason").and_then(Value::as_str)?;
            Some(StreamingChunk::Done {
                finish_reason: map_stop_reason(reason).to_string(),
            })
        }
        "error" => Some(StreamingChunk::Error {
            error_code: event
                .pointer("/error/type")
                .and_then(Value::as_str)
                .unwrap_or("internal")
                .to_string(),
        }),
        // ping, message_start, content_block_stop, message_stop
        _ => None,
    }
}

/// Drive an Anthropic SSE body into normalized chunks.
fn event_chunk_stream(response: reqwest::Response) -> ChunkStream {
    let mut body = response.bytes_stream();
    Box::pin(stream! {
        let mut buffer = String::new();
        let mut done_emitted = false;

        while let Some(frame) = body.next().await {
            let bytes = match frame {
                Ok(bytes) => bytes,
                Err(e) => {
                    let err = classify_transport(PROVIDER, &e);
                    err.log();
                    yield Ok(StreamingChunk::Error {
                        error_code: err.kind.as_str().to_string(),
                    });
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim();
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if let Some(chunk) = translate_event(data) {
                    match &chunk {
                        StreamingChunk::Done { .. } => {
                            if done_emitted {
                                continue;
                            }
                            done_emitted = true;
                            yield Ok(chunk);
                        }
                        StreamingChunk::Error { .. } => {
                            yield Ok(chunk);
                            return;
                        }
                        _ => yield Ok(chunk),
                    }
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamingChunk::Done { finish_reason: "stop".to_string() });
        }
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
