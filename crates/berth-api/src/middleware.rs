//! Request pipeline middleware.
//!
//! Outermost first: [`request_id`] assigns or propagates a request id,
//! then [`observe`] opens the per-request span, times the request, bumps
//! the HTTP metrics and emits one access-log event. Authentication sits
//! further in, on the protected routes only.

use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::trace::{Span, SpanKind, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ErrorDetail;

/// Inbound/outbound header carrying the request id.
#[derive(Clone)]
pub struct RequestIdHeader(pub HeaderName);

impl Default for RequestIdHeader {
    fn default() -> Self {
        Self(HeaderName::from_static("x-request-id"))
    }
}

/// Id attached to the current request, generated when the client sent none.
#[derive(Debug, Clone, Default)]
pub struct RequestId(pub String);

pub async fn request_id(
    State(header): State<RequestIdHeader>,
    mut request: Request,
    next: Next,
) -> Response {
    let id = request
        .headers()
        .get(&header.0)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(header.0, value);
    }
    response
}

/// One span, one access-log line and one metrics sample per request.
///
/// The span is named `"{METHOD} {route}"` with the route template, not
/// the concrete path, so cardinality stays bounded and the mutation
/// sampler can match on the name. The same template labels the metrics.
pub async fn observe(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .cloned()
        .unwrap_or_default()
        .0;

    let tracer = global::tracer("berth-api");
    let mut span = tracer
        .span_builder(format!("{method} {route}"))
        .with_kind(SpanKind::Server)
        .start(&tracer);

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = started.elapsed();
    span.set_attribute(KeyValue::new("http.status_code", i64::from(status)));
    span.set_attribute(KeyValue::new("http.request_id", request_id.clone()));
    span.end();

    metrics::counter!(
        "requests_total",
        "status" => status.to_string(),
        "method" => method.clone(),
        "path" => route.clone(),
    )
    .increment(1);
    metrics::histogram!(
        "request_duration_seconds",
        "method" => method.clone(),
        "path" => route.clone(),
    )
    .record(elapsed.as_secs_f64());

    match response.extensions().get::<ErrorDetail>() {
        Some(detail) => warn!(
            %method,
            route = %route,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            request_id = %request_id,
            error = %detail.0,
            "request failed"
        ),
        None => info!(
            %method,
            route = %route,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            request_id = %request_id,
            "request"
        ),
    }
    response
}
