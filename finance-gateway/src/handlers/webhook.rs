//! Inbound provider notifications.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use service_core::error::AppError;

use crate::models::CallbackAck;
use crate::services::lifecycle::SIGNATURE_HEADER;
use crate::startup::AppState;

/// Always answers 200 with an acknowledgement once the delivery was read;
/// order store failures surface as 5xx so the provider redelivers.
pub async fn finance_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let result = state
        .engine
        .handle_callback(&body, signature)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Finance webhook could not be applied");
            AppError::from(e)
        })?;

    tracing::debug!(outcome = result.outcome.as_str(), "Finance webhook acknowledged");
    Ok(Json(result.ack))
}
