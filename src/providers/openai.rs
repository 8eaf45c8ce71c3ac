//! OpenAI chat-completions adapter.
//!
//! Speaks the standard `/v1/chat/completions` protocol with bearer auth. The
//! wire shape lives in [`super::wire`]; this module owns client construction,
//! the retry/breaker envelope, and availability probing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde_json::Value;

use crate::breaker::BreakerMode;
use crate::error::RouterError;
use crate::types::{NormalizedResponse, Prompt, RequestOptions};

use super::{
    classify_http, classify_transport, retry_after_ms, wire, AdapterDetails, AdapterRuntime,
    ChunkStream, ProviderAdapter,
};

const PROVIDER: &str = "openai";
const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const CONTEXT_WINDOW: u32 = 128_000;

/// Adapter for the OpenAI API.
pub struct OpenAiAdapter {
    /// Buffered requests — per-request timeout applied from the options.
    client: Client,
    /// Streaming requests — no request-level timeout (body arrives incrementally).
    stream_client: Client,
    base_url: String,
    runtime: Arc<AdapterRuntime>,
}

impl OpenAiAdapter {
    /// Build an adapter with the given bearer token.
    pub fn new(base_url: Option<String>, api_key: String, runtime: Arc<AdapterRuntime>) -> Self {
        let mut headers = header::HeaderMap::new();
        let value = format!("Bearer {api_key}");
        // Panics on invalid header bytes — surfaces misconfiguration at startup,
        // not at request time.
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&value)
                .expect("API key contains invalid Authorization header characters"),
        );

        let client = Client::builder()
            .default_headers(headers.clone())
            .build()
            .expect("failed to build reqwest client");
        let stream_client = Client::builder()
            .default_headers(headers)
            .build()
            .expect("failed to build streaming reqwest client");

        Self {
            client,
            stream_client,
            base_url: base_url
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            runtime,
        }
    }

    async fn post_completion(
        &self,
        body: &Value,
        timeout_ms: u64,
    ) -> Result<Value, RouterError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
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

    async fn post_stream(&self, body: &Value) -> Result<reqwest::Response, RouterError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .stream_client
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
impl ProviderAdapter for OpenAiAdapter {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    /// Probe `GET /v1/models` — cheap and exercises auth.
    async fn is_available(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        matches!(
            self.client
                .get(&url)
                .timeout(Duration::from_secs(5))
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
            "function-calling",
            "tool-calling",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    fn details(&self) -> AdapterDetails {
        AdapterDetails {
            provider: PROVIDER,
            version: "v1",
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
        let body = wire::request_body(model, &messages, opts, false);

        let raw = self
            .runtime
            .call(PROVIDER, model, BreakerMode::Unary, opts, || {
                self.post_completion(&body, opts.timeout_ms)
            })
            .await?;

        let mut response = wire::normalize_response(PROVIDER, &raw, &messages)?;
        if response.model_used.is_empty() {
            response.model_used = model.to_string();
        }
        Ok(response)
    }

    async fn generate_stream(
        &self,
        model: &str,
        prompt: &Prompt,
        opts: &RequestOptions,
    ) -> Result<ChunkStream, RouterError> {
        let messages = wire::build_messages(prompt, opts);
        let body = wire::request_body(model, &messages, opts, true);

        let response = self
            .runtime
            .call(PROVIDER, model, BreakerMode::Stream, opts, || {
                self.post_stream(&body)
            })
            .await?;

        Ok(wire::chunk_stream(PROVIDER, response))
    }
}
