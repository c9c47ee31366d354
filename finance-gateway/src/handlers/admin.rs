//! Merchant-side lifecycle actions: the two-phase cancel/refund confirmation,
//! the order-completed hook and provider diagnostics.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{EnvironmentResponse, StatusCheckQuery, StatusSkipQuery, StatusUpdateQuery};
use crate::middleware::AdminContext;
use crate::models::{ConfirmationPrompt, LenderAction, StatusUpdate};
use crate::startup::AppState;

/// Phase one: what would saving this status change ask of the lender?
pub async fn status_check(
    State(state): State<AppState>,
    _admin: AdminContext,
    Query(query): Query<StatusCheckQuery>,
) -> Result<Json<ConfirmationPrompt>, AppError> {
    query.validate()?;

    tracing::info!(
        application_id = %query.id,
        status = %query.status,
        "Checking status change against finance application"
    );

    let prompt = state.engine.check_status(&query.status, &query.id).await?;
    Ok(Json(prompt))
}

/// Phase two: the merchant confirmed; notify the lender.
pub async fn status_update(
    State(state): State<AppState>,
    _admin: AdminContext,
    Query(query): Query<StatusUpdateQuery>,
) -> Result<Json<StatusUpdate>, AppError> {
    query.validate()?;

    let update = state
        .engine
        .update_status(&query.application_id, &query.wf_action, query.reason)
        .await;

    Ok(Json(update))
}

/// The merchant confirmed the status change but declined to notify the lender.
pub async fn status_skip(
    State(state): State<AppState>,
    _admin: AdminContext,
    Query(query): Query<StatusSkipQuery>,
) -> Result<Json<Value>, AppError> {
    query.validate()?;

    let action = LenderAction::parse(&query.wf_action)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("Could not find action")))?;

    state
        .engine
        .record_unnotified_transition(&query.order_id, action)
        .await?;

    Ok(Json(json!({ "success": true, "action": action })))
}

pub async fn order_completed(
    State(state): State<AppState>,
    _admin: AdminContext,
    Path(order_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let outcome = state.engine.send_fulfillment(&order_id).await?;
    Ok(Json(json!({ "order_id": order_id, "fulfillment": outcome })))
}

pub async fn environment(
    State(state): State<AppState>,
    _admin: AdminContext,
) -> Result<Json<EnvironmentResponse>, AppError> {
    let environment = state.availability.finance_environment().await?;
    let healthy = state.availability.provider_healthy().await.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Finance provider health check failed");
        false
    });

    Ok(Json(EnvironmentResponse {
        environment,
        healthy,
    }))
}
