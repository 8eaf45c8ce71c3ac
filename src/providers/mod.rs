//! Provider adapter runtime.
//!
//! One adapter per provider family, all behind [`ProviderAdapter`]; the router
//! holds them as `Arc<dyn ProviderAdapter>` keyed by provider tag and never
//! sees provider-shaped JSON. Protocol differences — schema translation, auth
//! headers, endpoint paths, SSE dialects — are fully encapsulated in the
//! adapter modules.
//!
//! [`AdapterRuntime`] is the shared call engine: it consults the circuit
//! breaker before the first attempt, retries retryable failures with
//! exponential backoff + jitter (honoring `Retry-After` as a lower bound),
//! trips the breaker on terminal auth/quota/content-filter errors, and resets
//! it on the first success after half-open.

pub mod anthropic;
pub mod lmstudio;
pub mod openai;
pub mod wire;

pub use anthropic::AnthropicAdapter;
pub use lmstudio::LmStudioAdapter;
pub use openai::OpenAiAdapter;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use rand::Rng;

use crate::breaker::{BreakerMode, CircuitBreaker, CircuitState};
use crate::error::{ErrorKind, RouterError};
use crate::types::{estimate_tokens, NormalizedResponse, Prompt, RequestOptions, StreamingChunk};

/// A `Send`-able, heap-allocated lazy finite sequence of streaming chunks.
///
/// Single-consumer; dropping it drops the underlying HTTP body.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamingChunk, RouterError>> + Send>>;

/// Static facts about an adapter.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdapterDetails {
    pub provider: &'static str,
    pub version: &'static str,
    pub context_window: u32,
}

/// The common generation contract every provider family implements.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Provider tag (`openai`, `anthropic`, `lmstudio`).
    fn provider(&self) -> &'static str;

    /// Cheap liveness probe; drives the availability map.
    async fn is_available(&self) -> bool;

    /// Capability tags this adapter family supports.
    fn capabilities(&self) -> Vec<String>;

    fn details(&self) -> AdapterDetails;

    /// One unary completion, normalized.
    async fn generate(
        &self,
        model: &str,
        prompt: &Prompt,
        opts: &RequestOptions,
    ) -> Result<NormalizedResponse, RouterError>;

    /// One streaming completion as a lazy finite chunk sequence.
    async fn generate_stream(
        &self,
        model: &str,
        prompt: &Prompt,
        opts: &RequestOptions,
    ) -> Result<ChunkStream, RouterError>;

    /// Token count for `text` when the provider reports no usage.
    fn count_tokens(&self, text: &str) -> u32 {
        estimate_tokens(text)
    }
}

/// Ceiling on a single backoff sleep.
const MAX_BACKOFF_MS: u64 = 30_000;

/// Backoff before retry `attempt + 1`:
/// `min(initial · 2^attempt + uniform(0, 0.2 · initial · 2^attempt), 30 s)`,
/// floored at any `Retry-After` the provider sent.
pub(crate) fn backoff_delay(
    attempt: u32,
    initial_backoff_ms: u64,
    retry_after_ms: Option<u64>,
) -> Duration {
    let base = initial_backoff_ms.saturating_mul(1u64 << attempt.min(20));
    let jitter = (rand::thread_rng().gen::<f64>() * 0.2 * base as f64) as u64;
    let capped = base.saturating_add(jitter).min(MAX_BACKOFF_MS);
    Duration::from_millis(capped.max(retry_after_ms.unwrap_or(0)))
}

/// Shared retry + circuit-breaker engine used by every adapter.
pub struct AdapterRuntime {
    breaker: Arc<CircuitBreaker>,
}

impl AdapterRuntime {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }

    /// Run `attempt_fn` under breaker + retry policy.
    ///
    /// Behavior per state:
    /// - open: fail fast with `model_unavailable`, no outbound call.
    /// - half-open: a single probe — success resets the breaker, any failure
    ///   re-opens it without retrying.
    /// - closed: retryable failures are retried up to the option budget with
    ///   exponential backoff; tripping kinds open the breaker immediately.
    pub async fn call<T, F, Fut>(
        &self,
        provider: &'static str,
        model: &str,
        mode: BreakerMode,
        opts: &RequestOptions,
        attempt_fn: F,
    ) -> Result<T, RouterError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RouterError>>,
    {
        let state = self.breaker.state(provider, model, mode).await;
        if state == CircuitState::Open {
            return Err(RouterError::new(
                ErrorKind::ModelUnavailable,
                format!("circuit open for {provider}/{model}"),
            )
            .with_source(provider));
        }
        let probing = state == CircuitState::HalfOpen;

        let retries = if probing { 0 } else { opts.effective_retries() };
        let mut attempt: u32 = 0;
        loop {
            match attempt_fn().await {
                Ok(value) => {
                    if probing {
                        self.breaker.reset(provider, model, mode).await;
                        tracing::info!(provider, model, "half-open probe succeeded — breaker closed");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if err.kind.trips_breaker() || probing {
                        self.breaker.trip(provider, model, mode).await;
                        return Err(err);
                    }
                    if !err.retryable() || attempt >= retries {
                        return Err(err);
                    }
                    let delay = backoff_delay(attempt, opts.initial_backoff_ms, err.retry_after_ms);
                    tracing::debug!(
                        provider,
                        model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retryable adapter failure — backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Map a provider HTTP status + body to the error taxonomy.
///
/// `retry_after_ms` comes from a `Retry-After` header when the provider sent
/// one; it is attached only to rate-limit errors where it bounds the backoff.
pub(crate) fn classify_http(
    provider: &'static str,
    status: u16,
    body: &str,
    retry_after_ms: Option<u64>,
) -> RouterError {
    let lower = body.to_lowercase();
    let (kind, message) = match status {
        401 | 403 => (
            ErrorKind::ModelAuthentication,
            format!("{provider} rejected credentials (HTTP {status})"),
        ),
        429 if lower.contains("quota") || lower.contains("billing") => (
            ErrorKind::ModelQuotaExceeded,
            format!("{provider} quota exhausted (HTTP 429)"),
        ),
        429 => (
            ErrorKind::ModelRateLimited,
            format!("{provider} rate limited (HTTP 429)"),
        ),
        400 => (
            ErrorKind::ModelInvalidRequest,
            format!("{provider} rejected request (HTTP 400): {}", truncate(body, 200)),
        ),
        413 => (
            ErrorKind::ModelContextLength,
            format!("{provider} context length exceeded (HTTP 413)"),
        ),
        422 if lower.contains("content") || lower.contains("policy") || lower.contains("filter") => (
            ErrorKind::ModelContentFiltered,
            format!("{provider} filtered the content (HTTP 422)"),
        ),
        422 => (
            ErrorKind::ModelInvalidRequest,
            format!("{provider} rejected request (HTTP 422): {}", truncate(body, 200)),
        ),
        500..=599 => (
            ErrorKind::ModelUnavailable,
            format!("{provider} returned HTTP {status}"),
        ),
        other => (
            ErrorKind::ModelInvalidRequest,
            format!("{provider} returned unexpected HTTP {other}: {}", truncate(body, 200)),
        ),
    };

    let mut err = RouterError::new(kind, message).with_source(provider);
    if kind == ErrorKind::ModelRateLimited {
        if let Some(ms) = retry_after_ms {
            err = err.with_retry_after_ms(ms);
        }
    }
    err
}

/// Map a transport-level failure (connect, timeout, body read) to the taxonomy.
pub(crate) fn classify_transport(provider: &'static str, err: &reqwest::Error) -> RouterError {
    let kind = if err.is_timeout() {
        ErrorKind::ModelTimeout
    } else {
        ErrorKind::NetworkError
    };
    RouterError::new(kind, format!("{provider} request failed: {err}")).with_source(provider)
}

/// `Retry-After` header in milliseconds, when parseable as whole seconds.
pub(crate) fn retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs * 1_000)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
