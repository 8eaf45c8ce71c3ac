//! Typed error taxonomy for the routing core.
//!
//! Every failure in the pipeline is a [`RouterError`]: an [`ErrorKind`] plus a
//! human-readable message, a source tag (which component produced it), a
//! correlation id, and an optional details payload. The kind alone determines
//! the external HTTP status, the log severity, whether the adapter runtime may
//! retry, and whether the circuit breaker trips.
//!
//! Handlers return `Result<T, AppError>` and propagate with `?`; [`AppError`]
//! renders the structured envelope
//! `{error, code, statusCode, correlationId, timestamp}` via [`IntoResponse`].
//! Stack-level detail goes to the logs, never to the client.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};

/// Log severity attached to each error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// The full error taxonomy. Wire form is snake_case (`model_rate_limited`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Internal,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    ModelUnavailable,
    ModelTimeout,
    ModelRateLimited,
    ModelAuthentication,
    ModelQuotaExceeded,
    ModelContentFiltered,
    ModelInvalidRequest,
    ModelContextLength,
    NetworkError,
    Timeout,
    DbError,
    DbConnection,
    DbQuery,
    CacheError,
    CacheMiss,
    RouterNoModels,
    RouterAllModelsFailed,
}

impl ErrorKind {
    /// Wire code, e.g. `model_rate_limited`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "internal",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::ModelUnavailable => "model_unavailable",
            Self::ModelTimeout => "model_timeout",
            Self::ModelRateLimited => "model_rate_limited",
            Self::ModelAuthentication => "model_authentication",
            Self::ModelQuotaExceeded => "model_quota_exceeded",
            Self::ModelContentFiltered => "model_content_filtered",
            Self::ModelInvalidRequest => "model_invalid_request",
            Self::ModelContextLength => "model_context_length",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::DbError => "db_error",
            Self::DbConnection => "db_connection",
            Self::DbQuery => "db_query",
            Self::CacheError => "cache_error",
            Self::CacheMiss => "cache_miss",
            Self::RouterNoModels => "router_no_models",
            Self::RouterAllModelsFailed => "router_all_models_failed",
        }
    }

    /// HTTP status for the external surface.
    pub fn status(self) -> StatusCode {
        match self {
            Self::BadRequest | Self::ModelInvalidRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::ModelAuthentication => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound | Self::CacheMiss => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::ModelContextLength => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ModelContentFiltered => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ModelRateLimited | Self::ModelQuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::ModelTimeout | Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ModelUnavailable | Self::RouterNoModels | Self::RouterAllModelsFailed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::NetworkError => StatusCode::BAD_GATEWAY,
            Self::Internal | Self::DbError | Self::DbConnection | Self::DbQuery | Self::CacheError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Whether the adapter runtime may retry after this kind.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            Self::ModelRateLimited
                | Self::ModelTimeout
                | Self::ModelUnavailable
                | Self::NetworkError
                | Self::Timeout
                | Self::DbConnection
        )
    }

    /// Whether this kind trips the per-(provider, model) circuit breaker.
    pub fn trips_breaker(self) -> bool {
        matches!(
            self,
            Self::ModelAuthentication | Self::ModelQuotaExceeded | Self::ModelContentFiltered
        )
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::CacheMiss => Severity::Debug,
            Self::BadRequest | Self::ModelInvalidRequest | Self::NotFound => Severity::Info,
            Self::ModelRateLimited
            | Self::ModelTimeout
            | Self::ModelUnavailable
            | Self::NetworkError
            | Self::Timeout
            | Self::CacheError
            | Self::Conflict
            | Self::ModelContextLength => Severity::Warn,
            Self::Unauthorized
            | Self::Forbidden
            | Self::ModelAuthentication
            | Self::ModelQuotaExceeded
            | Self::ModelContentFiltered
            | Self::DbError
            | Self::DbQuery
            | Self::RouterNoModels
            | Self::RouterAllModelsFailed
            | Self::Internal => Severity::Error,
            Self::DbConnection => Severity::Fatal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified pipeline failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RouterError {
    pub kind: ErrorKind,
    pub message: String,
    /// Component that produced the error: `router`, `cache`, `registry`,
    /// or a provider tag (`openai`, `anthropic`, `lmstudio`).
    pub source_tag: &'static str,
    pub correlation_id: Option<String>,
    pub details: Option<Value>,
    pub timestamp: DateTime<Utc>,
    /// Lower bound for the next retry sleep, from a `Retry-After` header.
    pub retry_after_ms: Option<u64>,
}

impl RouterError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source_tag: "router",
            correlation_id: None,
            details: None,
            timestamp: Utc::now(),
            retry_after_ms: None,
        }
    }

    pub fn with_source(mut self, source_tag: &'static str) -> Self {
        self.source_tag = source_tag;
        self
    }

    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }

    /// Emit a log line at the severity the kind prescribes.
    pub fn log(&self) {
        match self.kind.severity() {
            Severity::Debug => {
                tracing::debug!(code = %self.kind, source = self.source_tag, "{}", self.message);
            }
            Severity::Info => {
                tracing::info!(code = %self.kind, source = self.source_tag, "{}", self.message);
            }
            Severity::Warn => {
                tracing::warn!(code = %self.kind, source = self.source_tag, "{}", self.message);
            }
            Severity::Error | Severity::Fatal => {
                tracing::error!(code = %self.kind, source = self.source_tag, "{}", self.message);
            }
        }
    }
}

/// Wraps [`RouterError`] so handlers can return it from axum with `?`.
///
/// The client sees the structured envelope only; message detail beyond the
/// classified kind stays in the logs.
#[derive(Debug)]
pub struct AppError(pub RouterError);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let err = self.0;
        err.log();
        let status = err.kind.status();
        let body = json!({
            "error": err.message,
            "code": err.kind.as_str(),
            "statusCode": status.as_u16(),
            "correlationId": err.correlation_id,
            "timestamp": err.timestamp.to_rfc3339(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<RouterError> for AppError {
    fn from(e: RouterError) -> Self {
        Self(e)
    }
}

/// Sliding per-minute error-rate accounting.
///
/// Tracks a lifetime counter per kind plus a rolling one-minute window. When a
/// kind crosses [`NOISY_PER_MINUTE`] events in the window a single warn log is
/// emitted; the warning re-arms once the rate drops back under the threshold.
pub struct ErrorTelemetry {
    counters: DashMap<ErrorKind, u64>,
    window: Mutex<ErrorWindow>,
}

const NOISY_PER_MINUTE: usize = 10;

struct ErrorWindow {
    events: VecDeque<(Instant, ErrorKind)>,
    warned: Vec<ErrorKind>,
}

impl ErrorTelemetry {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            window: Mutex::new(ErrorWindow {
                events: VecDeque::new(),
                warned: Vec::new(),
            }),
        }
    }

    /// Record one occurrence of `kind`.
    pub fn record(&self, kind: ErrorKind) {
        *self.counters.entry(kind).or_insert(0) += 1;

        let now = Instant::now();
        let mut win = self.window.lock().expect("telemetry lock poisoned");
        win.events.push_back((now, kind));
        while let Some(&(t, _)) = win.events.front() {
            if now.duration_since(t) > Duration::from_secs(60) {
                win.events.pop_front();
            } else {
                break;
            }
        }

        let in_window = win.events.iter().filter(|(_, k)| *k == kind).count();
        if in_window > NOISY_PER_MINUTE {
            if !win.warned.contains(&kind) {
                win.warned.push(kind);
                tracing::warn!(code = %kind, count = in_window, "error rate exceeded 10/min");
            }
        } else {
            win.warned.retain(|k| *k != kind);
        }
    }

    /// Lifetime count for `kind`.
    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.counters.get(&kind).map(|c| *c).unwrap_or(0)
    }
}

impl Default for ErrorTelemetry {
    fn default() -> Self {
        Self::new()
    }
}
