//! Storefront checkout endpoints.

use axum::{extract::State, Json};
use service_core::error::AppError;
use validator::Validate;

use crate::dtos::{CheckoutRequest, CheckoutResponse};
use crate::error::GatewayError;
use crate::models::Cart;
use crate::services::application_builder::CheckoutSelection;
use crate::services::availability::Offerability;
use crate::startup::AppState;

/// Submit (or resubmit) the finance application for an order.
///
/// Provider rejections come back as 402 with the provider's message so the
/// storefront can show it to the shopper.
pub async fn submit_application(
    State(state): State<AppState>,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    payload.validate()?;

    tracing::info!(
        order_id = %payload.order_id,
        finance_plan_id = %payload.finance_plan_id,
        deposit_amount = payload.deposit_amount,
        "Submitting finance application"
    );

    let selection = CheckoutSelection {
        finance_plan_id: payload.finance_plan_id,
        deposit_amount: payload.deposit_amount,
    };

    let redirect = state
        .engine
        .submit_application(&payload.order_id, &payload.cart, &selection)
        .await
        .map_err(|e| match e {
            GatewayError::Api(api) => AppError::PaymentRejected(api.public_message()),
            other => AppError::from(other),
        })?;

    Ok(Json(CheckoutResponse {
        result: "success",
        application_id: redirect.application_id,
        redirect: redirect.redirect,
    }))
}

pub async fn availability(
    State(state): State<AppState>,
    Json(cart): Json<Cart>,
) -> Json<Offerability> {
    let offer = state.availability.is_offerable(&cart).await;
    if let Some(reason) = offer.reason {
        tracing::debug!(reason, total = %cart.total, "Finance not offered for cart");
    }
    Json(offer)
}
