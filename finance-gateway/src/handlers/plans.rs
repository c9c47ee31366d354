use axum::{
    extract::{Query, State},
    Json,
};
use service_core::error::AppError;

use crate::dtos::PlansQuery;
use crate::error::GatewayError;
use crate::models::FinancePlan;
use crate::startup::AppState;

pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<PlansQuery>,
) -> Result<Json<Vec<FinancePlan>>, AppError> {
    let plans = state
        .catalog
        .list_plans(
            query.only_active.unwrap_or(true),
            query.refined.unwrap_or(true),
        )
        .await
        .map_err(GatewayError::from)?;

    Ok(Json(plans))
}
