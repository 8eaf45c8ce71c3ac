//! LM Studio local inference adapter.
//!
//! LM Studio exposes an OpenAI-compatible `/v1` surface on localhost, so the
//! wire handling is shared with the OpenAI adapter. Differences: no auth
//! header, a configurable default timeout for slow local models, and
//! availability probed against the local server's model list.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::breaker::BreakerMode;
use crate::error::RouterError;
use crate::types::{NormalizedResponse, Prompt, RequestOptions};

use super::{
    classify_http, classify_transport, retry_after_ms, wire, AdapterDetails, AdapterRuntime,
    ChunkStream, ProviderAdapter,
};

const PROVIDER: &str = "lmstudio";
const CONTEXT_WINDOW: u32 = 4_096;

/// Adapter for a local LM Studio server.
pub struct LmStudioAdapter {
    client: Client,
    base_url: String,
    /// Applied when the caller's options leave the default attempt timeout.
    default_timeout_ms: u64,
    runtime: Arc<AdapterRuntime>,
}

impl LmStudioAdapter {
    pub fn new(base_url: String, default_timeout_ms: u64, runtime: Arc<AdapterRuntime>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            default_timeout_ms,
            runtime,
        }
    }

    fn attempt_timeout(&self, opts: &RequestOptions) -> u64 {
        if opts.timeout_ms == RequestOptions::default().timeout_ms {
            self.default_timeout_ms
        } else {
            opts.timeout_ms
        }
    }

    async fn post_completion(&self, body: &Value, timeout_ms: u64) -> Result<Value, RouterError> {
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
impl ProviderAdapter for LmStudioAdapter {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/v1/models", self.base_url);
        matches!(
            self.client
                .get(&url)
                .timeout(Duration::from_secs(2))
                .send()
                .await,
            Ok(resp) if resp.status().is_success()
        )
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["text-generation".to_string(), "summarization".to_string()]
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
        let timeout_ms = self.attempt_timeout(opts);

        let raw = self
            .runtime
            .call(PROVIDER, model, BreakerMode::Unary, opts, || {
                self.post_completion(&body, timeout_ms)
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
