//! Shared data model: prompts, normalized responses, streaming chunks, and
//! per-call request options.
//!
//! Everything the router hands to callers is provider-agnostic. Adapters own
//! the provider-shaped JSON; these types are the only shapes that cross the
//! router boundary.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
    Tool,
}

/// One turn in a chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    /// Present for function/tool role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            name: None,
            function_call: None,
            tool_calls: None,
        }
    }
}

/// A request to call a named function, arguments as a raw JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// One entry of a tool-call list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

/// What the caller sent: a bare string or a full transcript.
#[derive(Debug, Clone)]
pub enum Prompt {
    Text(String),
    Messages(Vec<ChatMessage>),
}

impl Prompt {
    /// The text the classifier sees: the raw prompt, or the last user turn.
    pub fn classifier_text(&self) -> &str {
        match self {
            Self::Text(s) => s,
            Self::Messages(msgs) => msgs
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .and_then(|m| m.content.as_deref())
                .unwrap_or(""),
        }
    }

    /// Stable canonical form for fingerprinting.
    ///
    /// Role/name/content triples with unambiguous separators, prefixed by the
    /// prompt shape so a bare string and its single-user-message transcript
    /// never collide.
    pub fn canonical(&self) -> String {
        match self {
            Self::Text(s) => format!("text\u{1f}{s}"),
            Self::Messages(msgs) => {
                let mut out = String::from("messages");
                for m in msgs {
                    out.push('\u{1e}');
                    out.push_str(match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                        Role::Function => "function",
                        Role::Tool => "tool",
                    });
                    out.push('\u{1f}');
                    if let Some(name) = &m.name {
                        out.push_str(name);
                    }
                    out.push('\u{1f}');
                    if let Some(content) = &m.content {
                        out.push_str(content);
                    }
                }
                out
            }
        }
    }
}

/// Token accounting. `total` is always `prompt + completion` by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

impl TokenUsage {
    pub fn new(prompt: u32, completion: u32) -> Self {
        Self {
            prompt,
            completion,
            total: prompt + completion,
        }
    }

    /// Sum two usages (model chains aggregate per-step counts).
    pub fn add(self, other: Self) -> Self {
        Self::new(self.prompt + other.prompt, self.completion + other.completion)
    }
}

/// Estimate tokens for text without provider usage data: `ceil(len / 4)`.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}

/// The uniform response shape the router returns regardless of provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResponse {
    pub text: String,
    pub tokens: TokenUsage,
    pub model_used: String,
    /// Wall-clock pipeline time in seconds.
    pub processing_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<crate::classify::ClassifiedIntent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Full conversation including the appended assistant turn (chat only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatMessage>>,
    pub cached: bool,
    /// Model ids actually invoked, in order, when a chain ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_chain: Option<Vec<String>>,
}

impl NormalizedResponse {
    pub fn new(text: impl Into<String>, tokens: TokenUsage, model_used: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tokens,
            model_used: model_used.into(),
            processing_time: 0.0,
            cost: None,
            classification: None,
            function_call: None,
            tool_calls: None,
            messages: None,
            cached: false,
            model_chain: None,
        }
    }
}

/// One element of a streaming response.
///
/// The stream is finite and single-consumer: zero or more delta chunks, then
/// exactly one `Done` (or one `Error`, after which nothing else arrives).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamingChunk {
    /// Plain text delta.
    Text { delta: String },
    /// Partial function-call fragment.
    FunctionCallDelta {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        arguments_delta: String,
    },
    /// Partial tool-call fragment; `index` identifies which call it extends.
    ToolCallDelta {
        index: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        arguments_delta: String,
    },
    /// Terminal chunk; carries the finish reason and no content.
    Done { finish_reason: String },
    /// Terminal error chunk.
    Error { error_code: String },
}

/// Per-call options recognized by every adapter.
///
/// Defaults follow the adapter contract: 1024 tokens, temperature 0.7,
/// top_p 1, 60 s attempt timeout, 3 retries unary / 2 streaming, 1 s initial
/// backoff.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: Option<f64>,
    pub presence_penalty: Option<f64>,
    pub stop: Vec<String>,
    pub stream: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    /// Verbatim transcript override; when non-empty the raw prompt is unused.
    pub messages: Option<Vec<ChatMessage>>,
    /// Shorthand system turn prepended when `messages` is absent.
    pub system_message: Option<String>,
    pub functions: Option<Value>,
    pub function_call: Option<Value>,
    pub tools: Option<Value>,
    pub tool_choice: Option<Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 1.0,
            frequency_penalty: None,
            presence_penalty: None,
            stop: Vec::new(),
            stream: false,
            timeout_ms: 60_000,
            max_retries: 3,
            initial_backoff_ms: 1_000,
            messages: None,
            system_message: None,
            functions: None,
            function_call: None,
            tools: None,
            tool_choice: None,
        }
    }
}

impl RequestOptions {
    /// Retry budget for the current mode: 3 unary, 2 streaming.
    pub fn effective_retries(&self) -> u32 {
        if self.stream {
            self.max_retries.min(2)
        } else {
            self.max_retries
        }
    }
}

/// Bounded ring of the most recent per-call latencies for one model.
///
/// The average feeds `ModelInfo.latency` and the latency-optimized selection
/// axis. Capacity is fixed at 10 samples; older samples rotate out.
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<u64>,
}

const LATENCY_WINDOW_CAPACITY: usize = 10;

impl LatencyWindow {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_WINDOW_CAPACITY),
        }
    }

    pub fn record(&mut self, latency_ms: u64) {
        if self.samples.len() == LATENCY_WINDOW_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(latency_ms);
    }

    /// Rolling average, or `None` when no samples have been recorded.
    pub fn average_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64)
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}
