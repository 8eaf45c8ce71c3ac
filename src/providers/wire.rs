//! OpenAI-compatible chat-completions wire format.
//!
//! Shared by the `openai` and `lmstudio` adapters: request assembly, response
//! normalization, and SSE frame parsing. Anything that speaks the
//! `/v1/chat/completions` protocol — LM Studio, vLLM, LocalAI — goes through
//! here unchanged.

use async_stream::stream;
use futures_util::StreamExt as _;
use serde_json::{json, Value};

use crate::error::{ErrorKind, RouterError};
use crate::types::{
    estimate_tokens, ChatMessage, FunctionCall, NormalizedResponse, Prompt, RequestOptions, Role,
    StreamingChunk, TokenUsage, ToolCall,
};

use super::ChunkStream;

/// System prompt used when the caller supplies neither messages nor an
/// explicit system message.
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

/// Assemble the outbound message list.
///
/// Priority: an explicit `opts.messages` override wins; a transcript prompt is
/// used verbatim; a bare text prompt becomes `[system, user]`.
pub fn build_messages(prompt: &Prompt, opts: &RequestOptions) -> Vec<ChatMessage> {
    if let Some(messages) = &opts.messages {
        if !messages.is_empty() {
            return messages.clone();
        }
    }
    match prompt {
        Prompt::Messages(messages) if !messages.is_empty() => messages.clone(),
        Prompt::Messages(_) | Prompt::Text(_) => {
            let system = opts
                .system_message
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string());
            vec![
                ChatMessage::system(system),
                ChatMessage::user(prompt.classifier_text().to_string()),
            ]
        }
    }
}

/// Build a chat-completions request body.
pub fn request_body(
    model: &str,
    messages: &[ChatMessage],
    opts: &RequestOptions,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages,
        "max_tokens": opts.max_tokens,
        "temperature": opts.temperature,
        "top_p": opts.top_p,
        "stream": stream,
    });
    if let Some(fp) = opts.frequency_penalty {
        body["frequency_penalty"] = json!(fp);
    }
    if let Some(pp) = opts.presence_penalty {
        body["presence_penalty"] = json!(pp);
    }
    if !opts.stop.is_empty() {
        body["stop"] = json!(opts.stop);
    }
    if let Some(functions) = &opts.functions {
        body["functions"] = functions.clone();
    }
    if let Some(function_call) = &opts.function_call {
        body["function_call"] = function_call.clone();
    }
    if let Some(tools) = &opts.tools {
        body["tools"] = tools.clone();
    }
    if let Some(tool_choice) = &opts.tool_choice {
        body["tool_choice"] = tool_choice.clone();
    }
    body
}

fn parse_function_call(value: &Value) -> Option<FunctionCall> {
    Some(FunctionCall {
        name: value["name"].as_str()?.to_string(),
        arguments: value["arguments"].as_str().unwrap_or("{}").to_string(),
    })
}

fn parse_tool_calls(value: &Value) -> Option<Vec<ToolCall>> {
    let entries = value.as_array()?;
    let calls: Vec<ToolCall> = entries
        .iter()
        .filter_map(|entry| {
            Some(ToolCall {
                id: entry["id"].as_str().unwrap_or_default().to_string(),
                kind: entry["type"].as_str().unwrap_or("function").to_string(),
                function: parse_function_call(&entry["function"])?,
            })
        })
        .collect();
    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}

/// Normalize a unary chat-completions response.
///
/// Token counts come from provider-reported `usage` when present; otherwise
/// they are estimated at `ceil(len/4)` per segment (the full message list for
/// the prompt side, the generated text for the completion side).
pub fn normalize_response(
    provider: &'static str,
    body: &Value,
    messages: &[ChatMessage],
) -> Result<NormalizedResponse, RouterError> {
    let message = body
        .pointer("/choices/0/message")
        .ok_or_else(|| {
            RouterError::new(
                ErrorKind::Internal,
                format!("{provider} response has no choices"),
            )
            .with_source(provider)
        })?;

    let text = message["content"].as_str().unwrap_or_default().to_string();
    let function_call = message.get("function_call").and_then(parse_function_call);
    let tool_calls = message.get("tool_calls").and_then(parse_tool_calls);
    let model_used = body["model"].as_str().unwrap_or_default().to_string();

    let tokens = match body.get("usage") {
        Some(usage) if usage["prompt_tokens"].is_u64() || usage["completion_tokens"].is_u64() => {
            TokenUsage::new(
                usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
                usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
            )
        }
        _ => TokenUsage::new(estimate_messages(messages), estimate_tokens(&text)),
    };

    let mut response = NormalizedResponse::new(text, tokens, model_used);
    response.function_call = function_call;
    response.tool_calls = tool_calls;
    Ok(response)
}

/// Prompt-side token estimate: per-segment `ceil(len/4)` over the transcript.
pub fn estimate_messages(messages: &[ChatMessage]) -> u32 {
    messages
        .iter()
        .map(|m| estimate_tokens(m.content.as_deref().unwrap_or_default()))
        .sum()
}

/// Parse one SSE `data:` payload into a chunk.
///
/// Returns `None` for frames that carry nothing the consumer needs (empty
/// deltas, keep-alives). `[DONE]` is handled by the stream driver, not here.
pub fn parse_stream_frame(data: &str) -> Option<StreamingChunk> {
    let frame: Value = serde_json::from_str(data).ok()?;
    let choice = frame.pointer("/choices/0")?;

    if let Some(reason) = choice["finish_reason"].as_str() {
        return Some(StreamingChunk::Done {
            finish_reason: reason.to_string(),
        });
    }

    let delta = &choice["delta"];
    if let Some(content) = delta["content"].as_str() {
        if !content.is_empty() {
            return Some(StreamingChunk::Text {
                delta: content.to_string(),
            });
        }
    }
    if let Some(fc) = delta.get("function_call") {
        return Some(StreamingChunk::FunctionCallDelta {
            name: fc["name"].as_str().map(String::from),
            arguments_delta: fc["arguments"].as_str().unwrap_or_default().to_string(),
        });
    }
    if let Some(tool_calls) = delta["tool_calls"].as_array() {
        let entry = tool_calls.first()?;
        return Some(StreamingChunk::ToolCallDelta {
            index: entry["index"].as_u64().unwrap_or(0) as u32,
            id: entry["id"].as_str().map(String::from),
            name: entry.pointer("/function/name").and_then(Value::as_str).map(String::from),
            arguments_delta: entry
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
    }
    None
}

/// Drive a streaming HTTP body into a [`ChunkStream`].
///
/// Splits the byte stream on newlines, strips the `data: ` prefix, stops at
/// `data: [DONE]`. Exactly one terminal chunk is yielded: the provider's
/// finish-reason frame when it sent one, a synthetic `stop` otherwise. A
/// mid-stream transport error yields one error chunk and ends the stream.
pub fn chunk_stream(provider: &'static str, response: reqwest::Response) -> ChunkStream {
    let mut body = response.bytes_stream();
    Box::pin(stream! {
        let mut buffer = String::new();
        let mut done_emitted = false;

        'outer: while let Some(frame) = body.next().await {
            let bytes = match frame {
                Ok(bytes) => bytes,
                Err(e) => {
                    let err = super::classify_transport(provider, &e);
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
                if data == "[DONE]" {
                    break 'outer;
                }
                if let Some(chunk) = parse_stream_frame(data) {
                    if matches!(chunk, StreamingChunk::Done { .. }) {
                        if done_emitted {
                            continue;
                        }
                        done_emitted = true;
                    }
                    yield Ok(chunk);
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamingChunk::Done { finish_reason: "stop".to_string() });
        }
    })
}

/// Serialize a transcript plus the assistant turn for chat responses.
pub fn append_assistant_turn(
    mut messages: Vec<ChatMessage>,
    response: &NormalizedResponse,
) -> Vec<ChatMessage> {
    let mut turn = ChatMessage {
        role: Role::Assistant,
        content: Some(response.text.clone()),
        name: None,
        function_call: response.function_call.clone(),
        tool_calls: response.tool_calls.clone(),
    };
    if response.text.is_empty() && (turn.function_call.is_some() || turn.tool_calls.is_some()) {
        turn.content = None;
    }
    messages.push(turn);
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt as _;

    // -----------------------------------------------------------------------
    // Message assembly
    // -----------------------------------------------------------------------

    #[test]
    fn bare_prompt_becomes_system_plus_user() {
        let messages = build_messages(&Prompt::Text("hi".into()), &RequestOptions::default());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content.as_deref(), Some(DEFAULT_SYSTEM_MESSAGE));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content.as_deref(), Some("hi"));
    }

    #[test]
    fn system_message_shorthand_replaces_default() {
        let opts = RequestOptions {
            system_message: Some("Answer in French.".into()),
            ..RequestOptions::default()
        };
        let messages = build_messages(&Prompt::Text("hi".into()), &opts);
        assert_eq!(messages[0].content.as_deref(), Some("Answer in French."));
    }

    #[test]
    fn explicit_messages_override_is_verbatim() {
        let opts = RequestOptions {
            messages: Some(vec![ChatMessage::user("override")]),
            system_message: Some("ignored".into()),
            ..RequestOptions::default()
        };
        let messages = build_messages(&Prompt::Text("also ignored".into()), &opts);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content.as_deref(), Some("override"));
    }

    #[test]
    fn transcript_prompt_is_used_verbatim() {
        let transcript = vec![ChatMessage::system("s"), ChatMessage::user("u")];
        let messages = build_messages(
            &Prompt::Messages(transcript.clone()),
            &RequestOptions::default(),
        );
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content.as_deref(), Some("u"));
    }

    // -----------------------------------------------------------------------
    // Request body
    // -----------------------------------------------------------------------

    #[test]
    fn body_carries_sampling_parameters_and_model() {
        let opts = RequestOptions {
            max_tokens: 256,
            temperature: 0.2,
            stop: vec!["END".into()],
            frequency_penalty: Some(0.5),
            ..RequestOptions::default()
        };
        let messages = build_messages(&Prompt::Text("q".into()), &opts);
        let body = request_body("gpt-4.1", &messages, &opts, false);

        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["stream"], false);
        assert_eq!(body["stop"][0], "END");
        assert_eq!(body["frequency_penalty"], 0.5);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert!(body.get("presence_penalty").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn tools_and_tool_choice_pass_through_untouched() {
        let tools = json!([{"type": "function", "function": {"name": "lookup"}}]);
        let opts = RequestOptions {
            tools: Some(tools.clone()),
            tool_choice: Some(json!("auto")),
            ..RequestOptions::default()
        };
        let messages = build_messages(&Prompt::Text("q".into()), &opts);
        let body = request_body("gpt-4.1", &messages, &opts, false);
        assert_eq!(body["tools"], tools);
        assert_eq!(body["tool_choice"], "auto");
    }

    // -----------------------------------------------------------------------
    // Response normalization
    // -----------------------------------------------------------------------

    fn plain_messages() -> Vec<ChatMessage> {
        vec![ChatMessage::user("question text")]
    }

    #[test]
    fn normalize_uses_provider_usage_when_reported() {
        let body = json!({
            "model": "gpt-4.1",
            "choices": [{"message": {"role": "assistant", "content": "answer"}}],
            "usage": {"prompt_tokens": 11, "completion_tokens": 7, "total_tokens": 18},
        });
        let resp = normalize_response("openai", &body, &plain_messages()).unwrap();
        assert_eq!(resp.text, "answer");
        assert_eq!(resp.tokens, TokenUsage::new(11, 7));
        assert_eq!(resp.model_used, "gpt-4.1");
    }

    #[test]
    fn normalize_estimates_tokens_without_usage() {
        let body = json!({
            "model": "local",
            "choices": [{"message": {"role": "assistant", "content": "12345678"}}],
        });
        let resp = normalize_response("lmstudio", &body, &plain_messages()).unwrap();
        // prompt: ceil(13/4) = 4; completion: ceil(8/4) = 2
        assert_eq!(resp.tokens, TokenUsage::new(4, 2));
        assert_eq!(resp.tokens.total, 6);
    }

    #[test]
    fn normalize_extracts_function_call() {
        let body = json!({
            "model": "gpt-4.1",
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "function_call": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"},
            }}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3},
        });
        let resp = normalize_response("openai", &body, &plain_messages()).unwrap();
        assert_eq!(resp.text, "");
        let fc = resp.function_call.unwrap();
        assert_eq!(fc.name, "get_weather");
        assert!(fc.arguments.contains("Paris"));
    }

    #[test]
    fn normalize_extracts_ordered_tool_calls() {
        let body = json!({
            "model": "gpt-4.1",
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [
                    {"id": "call_1", "type": "function",
                     "function": {"name": "first", "arguments": "{}"}},
                    {"id": "call_2", "type": "function",
                     "function": {"name": "second", "arguments": "{}"}},
                ],
            }}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 3},
        });
        let resp = normalize_response("openai", &body, &plain_messages()).unwrap();
        let calls = resp.tool_calls.unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].function.name, "first");
        assert_eq!(calls[1].function.name, "second");
    }

    #[test]
    fn normalize_rejects_choiceless_body() {
        let err = normalize_response("openai", &json!({"model": "x"}), &plain_messages())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.source_tag, "openai");
    }

    // -----------------------------------------------------------------------
    // SSE frames
    // -----------------------------------------------------------------------

    #[test]
    fn text_delta_frame_parses() {
        let chunk = parse_stream_frame(
            r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
        )
        .unwrap();
        assert_eq!(chunk, StreamingChunk::Text { delta: "Hel".into() });
    }

    #[test]
    fn finish_reason_frame_becomes_done() {
        let chunk = parse_stream_frame(
            r#"{"choices":[{"delta":{},"finish_reason":"length"}]}"#,
        )
        .unwrap();
        assert_eq!(
            chunk,
            StreamingChunk::Done {
                finish_reason: "length".into()
            }
        );
    }

    #[test]
    fn function_call_fragments_are_tagged() {
        let chunk = parse_stream_frame(
            r#"{"choices":[{"delta":{"function_call":{"name":"f","arguments":"{\"a\""}},"finish_reason":null}]}"#,
        )
        .unwrap();
        match chunk {
            StreamingChunk::FunctionCallDelta { name, arguments_delta } => {
                assert_eq!(name.as_deref(), Some("f"));
                assert_eq!(arguments_delta, "{\"a\"");
            }
            other => panic!("expected function-call delta, got {other:?}"),
        }
    }

    #[test]
    fn tool_call_fragments_keep_their_index() {
        let chunk = parse_stream_frame(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_9","function":{"name":"g","arguments":""}}]},"finish_reason":null}]}"#,
        )
        .unwrap();
        match chunk {
            StreamingChunk::ToolCallDelta { index, id, name, .. } => {
                assert_eq!(index, 1);
                assert_eq!(id.as_deref(), Some("call_9"));
                assert_eq!(name.as_deref(), Some("g"));
            }
            other => panic!("expected tool-call delta, got {other:?}"),
        }
    }

    #[test]
    fn empty_and_malformed_frames_are_skipped() {
        assert!(parse_stream_frame("not json").is_none());
        assert!(parse_stream_frame(r#"{"choices":[]}"#).is_none());
        assert!(parse_stream_frame(
            r#"{"choices":[{"delta":{"content":""},"finish_reason":null}]}"#
        )
        .is_none());
    }

    // -----------------------------------------------------------------------
    // Stream driver (over a wiremock SSE body)
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn chunk_stream_yields_deltas_then_single_done() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"He\"},\"finish_reason\":null}]}\n\
                   data: {\"choices\":[{\"delta\":{\"content\":\"llo\"},\"finish_reason\":null}]}\n\
                   data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\
                   data: [DONE]\n";
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let response = reqwest::get(server.uri()).await.unwrap();
        let chunks: Vec<StreamingChunk> = chunk_stream("openai", response)
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(
            chunks,
            vec![
                StreamingChunk::Text { delta: "He".into() },
                StreamingChunk::Text { delta: "llo".into() },
                StreamingChunk::Done { finish_reason: "stop".into() },
            ]
        );
    }

    #[tokio::test]
    async fn chunk_stream_synthesizes_done_when_provider_omits_it() {
        let sse = "data: {\"choices\":[{\"delta\":{\"content\":\"x\"},\"finish_reason\":null}]}\n\
                   data: [DONE]\n";
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
            .mount(&server)
            .await;

        let response = reqwest::get(server.uri()).await.unwrap();
        let chunks: Vec<StreamingChunk> = chunk_stream("openai", response)
            .map(|c| c.unwrap())
            .collect()
            .await;

        assert_eq!(chunks.last().unwrap(), &StreamingChunk::Done {
            finish_reason: "stop".into()
        });
    }

    // -----------------------------------------------------------------------
    // Assistant turn
    // -----------------------------------------------------------------------

    #[test]
    fn assistant_turn_is_appended_to_transcript() {
        let resp = NormalizedResponse::new("the answer", TokenUsage::new(1, 2), "gpt-4.1");
        let out = append_assistant_turn(vec![ChatMessage::user("q")], &resp);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].role, Role::Assistant);
        assert_eq!(out[1].content.as_deref(), Some("the answer"));
    }
}
