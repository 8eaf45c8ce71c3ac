//! Correlation-id middleware.
//!
//! Every inbound request gets a correlation id: taken from the caller's
//! `x-correlation-id` header when present, freshly generated (UUID v4)
//! otherwise. The id is stored as an axum [`Extension`] for handlers, wrapped
//! in a tracing span so every log line for the request carries it, echoed
//! back in the response header, and reported in error envelopes.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument as _;
use uuid::Uuid;

/// Newtype carrying the assigned correlation id.
///
/// Read it in a handler with `Extension(correlation): Extension<CorrelationId>`.
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

/// Assign a [`CorrelationId`] to every request.
pub async fn correlation_middleware(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    req.extensions_mut().insert(CorrelationId(id.clone()));

    let span = tracing::debug_span!("correlation", id = %id);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(header_value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-correlation-id", header_value);
    }

    response
}
