use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::Cart;

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    #[validate(length(min = 1, message = "Order id is required"))]
    pub order_id: String,

    #[validate(length(min = 1, message = "A finance plan must be selected"))]
    pub finance_plan_id: String,

    /// Deposit in minor units.
    #[validate(range(min = 0, message = "Deposit cannot be negative"))]
    #[serde(default)]
    pub deposit_amount: i64,

    pub cart: Cart,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub result: &'static str,
    pub application_id: String,
    pub redirect: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlansQuery {
    #[serde(default)]
    pub only_active: Option<bool>,
    #[serde(default)]
    pub refined: Option<bool>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusCheckQuery {
    #[validate(length(min = 1, message = "Target status is required"))]
    pub status: String,
    #[validate(length(min = 1, message = "Application id is required"))]
    pub id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusUpdateQuery {
    #[validate(length(min = 1, message = "Application id is required"))]
    pub application_id: String,
    pub wf_action: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StatusSkipQuery {
    #[validate(length(min = 1, message = "Order id is required"))]
    pub order_id: String,
    pub wf_action: String,
}

#[derive(Debug, Serialize)]
pub struct EnvironmentResponse {
    pub environment: String,
    pub healthy: bool,
}
