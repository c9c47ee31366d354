//! Whether finance can be offered for a cart, and which provider
//! environment the configured key talks to.

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{GatewaySettings, ProductSelect};
use crate::error::GatewayError;
use crate::models::{Cart, FinancePlan};
use crate::services::finance_api::{FinanceApi, FinanceApiError};
use crate::services::plans::{
    effective_cart_max, effective_cart_threshold, filter_by_products, PlanCatalog,
};

pub const ENVIRONMENT_CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize)]
pub struct Offerability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    pub plans: Vec<FinancePlan>,
    pub threshold: Option<Decimal>,
    pub max: Option<Decimal>,
}

impl Offerability {
    fn unavailable(reason: &'static str) -> Self {
        Self {
            available: false,
            reason: Some(reason),
            plans: Vec::new(),
            threshold: None,
            max: None,
        }
    }
}

#[derive(Clone)]
pub struct GatewayAvailability {
    api: Arc<dyn FinanceApi>,
    catalog: PlanCatalog,
    settings: Arc<GatewaySettings>,
    has_api_key: bool,
    cache_key: String,
    environments: Arc<DashMap<String, (Instant, String)>>,
}

impl GatewayAvailability {
    pub fn new(
        api: Arc<dyn FinanceApi>,
        catalog: PlanCatalog,
        settings: Arc<GatewaySettings>,
        has_api_key: bool,
        base_url: Option<String>,
    ) -> Self {
        Self {
            api,
            catalog,
            settings,
            has_api_key,
            cache_key: base_url.unwrap_or_default(),
            environments: Arc::new(DashMap::new()),
        }
    }

    pub fn is_available(&self) -> bool {
        self.settings.enabled && self.has_api_key
    }

    /// Checkout filter. Any failure to learn the plans hides the gateway.
    pub async fn is_offerable(&self, cart: &Cart) -> Offerability {
        if !self.is_available() {
            return Offerability::unavailable("gateway is disabled");
        }

        if cart.items.is_empty() {
            return Offerability::unavailable("cart is empty");
        }

        let plans = match self.catalog.list_plans(true, true).await {
            Ok(plans) => plans,
            Err(e) => {
                tracing::warn!(error = %e, "Finance plans unavailable; hiding gateway");
                return Offerability::unavailable("finance plans could not be retrieved");
            }
        };

        if plans.is_empty() {
            return Offerability::unavailable("no finance plans are offerable");
        }

        let threshold = effective_cart_threshold(&plans, self.settings.cart_threshold);
        let max = effective_cart_max(&plans, self.settings.max_loan_amount);

        if threshold.is_some_and(|min| min > cart.total) || max.is_some_and(|max| max < cart.total)
        {
            return Offerability::unavailable("cart total is outside the financeable range");
        }

        let plans = match self.settings.product_select {
            ProductSelect::All => plans,
            ProductSelect::Price => {
                if cart
                    .products()
                    .any(|p| p.price_including_tax < self.settings.price_threshold)
                {
                    return Offerability::unavailable("a product is below the price threshold");
                }
                plans
            }
            ProductSelect::Selected => {
                let plans = filter_by_products(cart.products(), plans);
                if plans.is_empty() {
                    return Offerability::unavailable("no plan covers every product in the cart");
                }
                plans
            }
        };

        Offerability {
            available: true,
            reason: None,
            plans,
            threshold,
            max,
        }
    }

    /// Provider environment name, cached for five minutes per base URL.
    pub async fn finance_environment(&self) -> Result<String, GatewayError> {
        if let Some(entry) = self.environments.get(&self.cache_key) {
            let (fetched_at, environment) = entry.value();
            if fetched_at.elapsed() < ENVIRONMENT_CACHE_TTL {
                return Ok(environment.clone());
            }
        }

        let environment = self.api.environment().await?;
        self.environments
            .insert(self.cache_key.clone(), (Instant::now(), environment.clone()));

        Ok(environment)
    }

    pub async fn provider_healthy(&self) -> Result<bool, FinanceApiError> {
        self.api.health().await
    }
}
