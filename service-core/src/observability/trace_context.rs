//! Correlation headers for outbound provider calls.
//!
//! Outbound requests carry the W3C `traceparent` of the current span and the
//! `x-request-id` of the inbound request being served, when there is one.
//!
//! See: https://www.w3.org/TR/trace-context/

use opentelemetry::trace::TraceContextExt;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::middleware::tracing::{current_request_id, REQUEST_ID_HEADER};

pub const TRACEPARENT_HEADER: &str = "traceparent";
pub const TRACESTATE_HEADER: &str = "tracestate";

/// Insert the current span's trace context, if it has a valid one.
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let span = Span::current();
    let context = span.context();
    let otel_span = context.span();
    let span_context = otel_span.span_context();

    if !span_context.is_valid() {
        return;
    }

    let traceparent = format!(
        "00-{}-{}-{:02x}",
        span_context.trace_id(),
        span_context.span_id(),
        span_context.trace_flags().to_u8()
    );
    if let Ok(value) = HeaderValue::from_str(&traceparent) {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    let tracestate = span_context.trace_state().header();
    if !tracestate.is_empty()
        && let Ok(value) = HeaderValue::from_str(&tracestate)
    {
        headers.insert(TRACESTATE_HEADER, value);
    }
}

/// Build the correlation headers for one outbound call.
pub fn correlation_headers(request_id: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    inject_trace_context(&mut headers);

    if let Some(id) = request_id
        && let Ok(value) = HeaderValue::from_str(id)
    {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    headers
}

/// A `reqwest::RequestBuilder` that adds correlation headers on send.
pub struct TracedRequest {
    request: reqwest::RequestBuilder,
}

impl TracedRequest {
    pub fn new(request: reqwest::RequestBuilder) -> Self {
        Self { request }
    }

    pub fn header(self, key: &str, value: &str) -> Self {
        Self {
            request: self.request.header(key, value),
        }
    }

    /// Pre-serialized body, so the bytes sent are the bytes that were signed.
    pub fn body(self, body: String) -> Self {
        Self {
            request: self.request.body(body),
        }
    }

    pub async fn send(self) -> Result<reqwest::Response, reqwest::Error> {
        let request_id = current_request_id();
        self.request
            .headers(correlation_headers(request_id.as_deref()))
            .send()
            .await
    }
}

pub trait TracedClientExt {
    fn traced_get(&self, url: &str) -> TracedRequest;
    fn traced_post(&self, url: &str) -> TracedRequest;
    fn traced_patch(&self, url: &str) -> TracedRequest;
}

impl TracedClientExt for reqwest::Client {
    fn traced_get(&self, url: &str) -> TracedRequest {
        TracedRequest::new(self.get(url))
    }

    fn traced_post(&self, url: &str) -> TracedRequest {
        TracedRequest::new(self.post(url))
    }

    fn traced_patch(&self, url: &str) -> TracedRequest {
        TracedRequest::new(self.patch(url))
    }
}
