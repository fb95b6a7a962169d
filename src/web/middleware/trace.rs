//! Trace ID middleware.

use axum::{
    body::Body,
    http::{header::HeaderValue, Extensions, Request},
    middleware::Next,
    response::Response,
};

use crate::auth::{TraceId, TRACE_ID_HEADER};

/// Fallback header accepted from proxies that already tag requests.
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Trace ID middleware.
///
/// Adopts a well-formed inbound `X-Trace-Id` (or `X-Request-Id`), generates
/// one otherwise, stores it in the request extensions and echoes it on the
/// response.
pub async fn trace_id(mut req: Request<Body>, next: Next) -> Response {
    let inbound = req
        .headers()
        .get(TRACE_ID_HEADER)
        .or_else(|| req.headers().get(REQUEST_ID_HEADER))
        .and_then(|v| v.to_str().ok());
    let trace_id = TraceId::from_inbound(inbound);

    req.extensions_mut().insert(trace_id.clone());
    let mut response = next.run(req).await;

    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Trace ID assigned by [`trace_id`], or a fresh one when the middleware
/// is not installed.
pub fn trace_id_of(extensions: &Extensions) -> TraceId {
    extensions
        .get::<TraceId>()
        .cloned()
        .unwrap_or_else(TraceId::generate)
}
