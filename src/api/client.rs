//! Client-facing API — the endpoints callers talk to.
//!
//! Intentionally a thin layer: all routing logic lives in [`crate::router`].
//! Handlers validate boundary constraints, translate HTTP concerns into
//! router calls, and render the response envelope.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt as _;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::CacheStrategy;
use crate::error::{AppError, ErrorKind, RouterError};
use crate::kv::ServiceHealth;
use crate::router::{RouterState, RoutingOptions};
use crate::types::{ChatMessage, NormalizedResponse, Prompt, RequestOptions};

use super::correlation::{correlation_middleware, CorrelationId};

/// Longest prompt accepted at the boundary.
const MAX_PROMPT_CHARS: usize = 10_000;

/// Build the client-facing axum router.
pub fn router(state: Arc<RouterState>) -> Router {
    Router::new()
        .route("/prompt", post(prompt))
        .route("/chat", post(chat))
        .route("/models", get(models))
        .route("/health", get(health))
        .layer(axum::middleware::from_fn(correlation_middleware))
        .with_state(state)
}

/// Caller-supplied options, camelCase on the wire.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiOptions {
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    top_p: Option<f64>,
    frequency_penalty: Option<f64>,
    presence_penalty: Option<f64>,
    stop: Option<Vec<String>>,
    stream: Option<bool>,
    cost_optimize: Option<bool>,
    quality_optimize: Option<bool>,
    latency_optimize: Option<bool>,
    fallback_enabled: Option<bool>,
    chain_enabled: Option<bool>,
    cache_strategy: Option<CacheStrategy>,
    cache_ttl: Option<u64>,
    degraded_mode: Option<bool>,
    fallback_levels: Option<u32>,
    timeout_ms: Option<u64>,
}

impl ApiOptions {
    fn validate(&self) -> Result<(), RouterError> {
        let bad = |msg: &str| Err(RouterError::new(ErrorKind::BadRequest, msg));
        if self.max_tokens == Some(0) {
            return bad("maxTokens must be a positive integer");
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return bad("temperature must be within [0, 2]");
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return bad("topP must be within [0, 1]");
            }
        }
        for (name, value) in [
            ("frequencyPenalty", self.frequency_penalty),
            ("presencePenalty", self.presence_penalty),
        ] {
            if let Some(v) = value {
                if !(-2.0..=2.0).contains(&v) {
                    return Err(RouterError::new(
                        ErrorKind::BadRequest,
                        format!("{name} must be within [-2, 2]"),
                    ));
                }
            }
        }
        if self.cache_ttl == Some(0) {
            return bad("cacheTTL must be a positive integer");
        }
        Ok(())
    }

    fn request_options(&self) -> RequestOptions {
        let mut opts = RequestOptions::default();
        if let Some(v) = self.max_tokens {
            opts.max_tokens = v;
        }
        if let Some(v) = self.temperature {
            opts.temperature = v;
        }
        if let Some(v) = self.top_p {
            opts.top_p = v;
        }
        opts.frequency_penalty = self.frequency_penalty;
        opts.presence_penalty = self.presence_penalty;
        if let Some(v) = &self.stop {
            opts.stop = v.clone();
        }
        opts.stream = self.stream.unwrap_or(false);
        opts
    }

    fn routing_options(&self, state: &RouterState) -> RoutingOptions {
        let mut routing = RoutingOptions::from_settings(state.settings());
        if let Some(v) = self.cost_optimize {
            routing.cost_optimize = v;
        }
        if let Some(v) = self.quality_optimize {
            routing.quality_optimize = v;
        }
        if let Some(v) = self.latency_optimize {
            routing.latency_optimize = v;
        }
        if let Some(v) = self.fallback_enabled {
            routing.fallback_enabled = v;
        }
        if let Some(v) = self.chain_enabled {
            routing.chain_enabled = v;
        }
        if let Some(v) = self.cache_strategy {
            routing.cache_strategy = if state.settings().enable_cache {
                v
            } else {
                CacheStrategy::None
            };
        }
        if let Some(secs) = self.cache_ttl {
            routing.cache_ttl = Some(std::time::Duration::from_secs(secs));
        }
        if let Some(v) = self.degraded_mode {
            routing.degraded_mode = v;
        }
        if let Some(v) = self.fallback_levels {
            routing.fallback_levels = v;
        }
        if let Some(v) = self.timeout_ms {
            routing.timeout_ms = v;
        }
        routing
    }
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    prompt: String,
    model: Option<String>,
    #[serde(default)]
    options: ApiOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    messages: Vec<ChatMessage>,
    model: Option<String>,
    tools: Option<Value>,
    tool_choice: Option<Value>,
    #[serde(default)]
    options: ApiOptions,
}

/// Project a normalized response into the public envelope.
fn render(resp: &NormalizedResponse) -> Value {
    let mut body = json!({
        "response": resp.text,
        "model_used": resp.model_used,
        "tokens": {
            "prompt": resp.tokens.prompt,
            "completion": resp.tokens.completion,
            "total": resp.tokens.total,
        },
        "cached": resp.cached,
        "processing_time": resp.processing_time,
    });
    if let Some(cost) = resp.cost {
        body["cost"] = json!(cost);
    }
    if let Some(c) = &resp.classification {
        body["classification"] = json!({
            "intent": c.intent,
            "confidence": c.confidence,
            "features": c.features,
            "domain": c.domain,
        });
    }
    if let Some(chain) = &resp.model_chain {
        body["model_chain"] = json!(chain);
    }
    if let Some(messages) = &resp.messages {
        body["messages"] = json!(messages);
    }
    body
}

/// Serve a chunk stream as SSE-style `data: {json}` frames.
fn sse_response(stream: crate::providers::ChunkStream) -> Response {
    let frames = stream.map(|chunk| {
        let payload = match chunk {
            Ok(c) => serde_json::to_string(&c).unwrap_or_else(|_| "{}".to_string()),
            Err(e) => json!({"kind": "error", "error_code": e.kind.as_str()}).to_string(),
        };
        Ok::<Bytes, std::convert::Infallible>(Bytes::from(format!("data: {payload}\n\n")))
    });
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(frames),
    )
        .into_response()
}

/// `POST /prompt` — route a free-form prompt.
pub async fn prompt(
    State(state): State<Arc<RouterState>>,
    Extension(correlation): Extension<CorrelationId>,
    Json(req): Json<PromptRequest>,
) -> Result<Response, AppError> {
    let fail = |e: RouterError| AppError(e.with_correlation(correlation.0.clone()));

    if req.prompt.is_empty() || req.prompt.len() > MAX_PROMPT_CHARS {
        return Err(fail(RouterError::new(
            ErrorKind::BadRequest,
            format!("prompt must be between 1 and {MAX_PROMPT_CHARS} characters"),
        )));
    }
    req.options.validate().map_err(fail)?;

    let request = req.options.request_options();
    let routing = req.options.routing_options(&state);

    if request.stream {
        let stream = state
            .route_stream(
                Prompt::Text(req.prompt.clone()),
                req.model.as_deref(),
                request,
                routing,
            )
            .await
            .map_err(fail)?;
        return Ok(sse_response(stream));
    }

    let response = state
        .route(&req.prompt, req.model.as_deref(), request, routing)
        .await
        .map_err(fail)?;
    Ok((StatusCode::OK, Json(render(&response))).into_response())
}

/// `POST /chat` — route a chat transcript with optional tools.
pub async fn chat(
    State(state): State<Arc<RouterState>>,
    Extension(correlation): Extension<CorrelationId>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, AppError> {
    let fail = |e: RouterError| AppError(e.with_correlation(correlation.0.clone()));

    if req.messages.is_empty() {
        return Err(fail(RouterError::new(
            ErrorKind::BadRequest,
            "invalid request: messages must not be empty",
        )));
    }
    req.options.validate().map_err(fail)?;

    let mut request = req.options.request_options();
    request.tools = req.tools.clone();
    request.tool_choice = req.tool_choice.clone();
    let routing = req.options.routing_options(&state);

    let response = state
        .route_chat(req.messages, req.model.as_deref(), request, routing)
        .await
        .map_err(fail)?;
    Ok((StatusCode::OK, Json(render(&response))).into_response())
}

/// `GET /models` — current catalog projections.
pub async fn models(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    Json(json!({ "models": state.registry.models() }))
}

/// `GET /health` — gateway and dependency health.
pub async fn health(State(state): State<Arc<RouterState>>) -> impl IntoResponse {
    let settings = state.settings();

    let database = if settings.database_url.is_some() {
        state.registry.store_health().await
    } else {
        ServiceHealth::Unknown
    };
    let redis = if settings.redis_url.is_some() {
        state.kv_health().await
    } else {
        ServiceHealth::Disabled
    };

    let status = if database == ServiceHealth::Error {
        "error"
    } else if state.degraded() {
        "degraded"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": state.started_at.elapsed().as_secs(),
        "services": {
            "database": database,
            "redis": redis,
        },
        "config": {
            "cache_enabled": settings.enable_cache,
            "swagger_enabled": settings.enable_swagger,
        },
    }))
}
