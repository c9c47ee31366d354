//! HTTP handlers for finance-gateway.

pub mod admin;
pub mod checkout;
pub mod plans;
pub mod webhook;

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::get_metrics;

pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "finance-gateway" })),
    )
}

pub async fn readiness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ready" })))
}

/// Prometheus metrics endpoint.
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
