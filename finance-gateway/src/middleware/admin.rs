//! Bearer-token guard for merchant admin endpoints.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use crate::startup::AppState;

/// Present on a request once its bearer token matched the configured admin token.
#[derive(Debug, Clone, Copy)]
pub struct AdminContext;

#[async_trait]
impl FromRequestParts<AppState> for AdminContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let provided = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();

        if token_matches(state.config.admin.token.expose_secret(), provided) {
            return Ok(AdminContext);
        }

        tracing::warn!(path = %parts.uri.path(), "Failed admin authentication attempt");
        Err(AppError::Unauthorized(anyhow::anyhow!(
            "Invalid or missing admin token"
        )))
    }
}

/// An unset admin token locks the endpoints.
fn token_matches(expected: &str, provided: &str) -> bool {
    if expected.is_empty() || provided.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
