//! Error types for the finance lifecycle.

use service_core::error::AppError;
use thiserror::Error;

use crate::services::finance_api::FinanceApiError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Api(#[from] FinanceApiError),

    #[error("Configuration failure: {0}")]
    Configuration(String),

    #[error("Order {0} not found")]
    OrderNotFound(String),

    #[error("{0}")]
    NotFinanced(String),

    #[error("Order store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl GatewayError {
    /// Text suitable for showing to a shopper or merchant.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::Api(err) => err.public_message(),
            GatewayError::Store(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Api(FinanceApiError::NotConfigured(_))
            | GatewayError::Configuration(_) => AppError::ServiceUnavailable,
            GatewayError::Api(api) => AppError::BadGateway(api.public_message()),
            GatewayError::OrderNotFound(id) => {
                AppError::NotFound(anyhow::anyhow!("Order {} not found", id))
            }
            GatewayError::NotFinanced(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            GatewayError::Store(err) => AppError::DatabaseError(err),
        }
    }
}
