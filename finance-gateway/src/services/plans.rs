//! Finance plan catalog: which plans are offerable in a given context.

use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::{GatewaySettings, PlanSelection};
use crate::models::{FinancePlan, Product};
use crate::services::finance_api::{FinanceApi, FinanceApiError};
use crate::services::money::{from_minor, to_minor};

struct CachedPlans {
    fetched_at: Instant,
    plans: Vec<FinancePlan>,
}

#[derive(Clone)]
pub struct PlanCatalog {
    api: Arc<dyn FinanceApi>,
    settings: Arc<GatewaySettings>,
    cache_ttl: Option<Duration>,
    cache: Arc<RwLock<Option<CachedPlans>>>,
}

impl PlanCatalog {
    pub fn new(
        api: Arc<dyn FinanceApi>,
        settings: Arc<GatewaySettings>,
        cache_ttl: Option<Duration>,
    ) -> Self {
        Self {
            api,
            settings,
            cache_ttl,
            cache: Arc::new(RwLock::new(None)),
        }
    }

    async fn all_plans(&self) -> Result<Vec<FinancePlan>, FinanceApiError> {
        if let Some(ttl) = self.cache_ttl {
            if let Some(cached) = self.cache.read().await.as_ref() {
                if cached.fetched_at.elapsed() < ttl {
                    return Ok(cached.plans.clone());
                }
            }
        }

        let plans: Vec<FinancePlan> = self
            .api
            .finance_plans()
            .await?
            .into_iter()
            .map(FinancePlan::from)
            .collect();

        tracing::debug!(count = plans.len(), "Fetched finance plans");

        if self.cache_ttl.is_some() {
            *self.cache.write().await = Some(CachedPlans {
                fetched_at: Instant::now(),
                plans: plans.clone(),
            });
        }

        Ok(plans)
    }

    /// Fetch plans, optionally dropping inactive ones and applying the
    /// merchant's refine list when plan selection is restricted.
    pub async fn list_plans(
        &self,
        only_active: bool,
        apply_refinement: bool,
    ) -> Result<Vec<FinancePlan>, FinanceApiError> {
        let mut plans = self.all_plans().await?;

        if only_active {
            plans = filter_active(plans);
        }

        if apply_refinement && self.settings.plan_selection == PlanSelection::Selection {
            plans = refine(plans, &self.settings.refine_list);
        }

        Ok(plans)
    }

    /// Lower cart bound over the currently offerable plans.
    pub async fn effective_cart_threshold(&self) -> Result<Option<Decimal>, FinanceApiError> {
        let plans = self.list_plans(true, true).await?;
        Ok(effective_cart_threshold(&plans, self.settings.cart_threshold))
    }

    /// Upper cart bound over the currently offerable plans.
    pub async fn effective_cart_max(&self) -> Result<Option<Decimal>, FinanceApiError> {
        let plans = self.list_plans(true, true).await?;
        Ok(effective_cart_max(&plans, self.settings.max_loan_amount))
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }
}

pub fn filter_active(plans: Vec<FinancePlan>) -> Vec<FinancePlan> {
    plans.into_iter().filter(|plan| plan.active).collect()
}

/// Keep only plans named in `refine_list`, preserving catalog order.
pub fn refine(plans: Vec<FinancePlan>, refine_list: &[String]) -> Vec<FinancePlan> {
    let allowed: HashSet<&str> = refine_list.iter().map(String::as_str).collect();
    plans
        .into_iter()
        .filter(|plan| allowed.contains(plan.id.as_str()))
        .collect()
}

pub fn filter_by_product(product: &Product, plans: Vec<FinancePlan>) -> Vec<FinancePlan> {
    match product.plan_allow_list() {
        Some(allow_list) => refine(plans, allow_list),
        None => plans,
    }
}

pub fn filter_by_products<'a, I>(products: I, plans: Vec<FinancePlan>) -> Vec<FinancePlan>
where
    I: IntoIterator<Item = &'a Product>,
{
    let mut remaining = plans;
    for product in products {
        if remaining.is_empty() {
            break;
        }
        remaining = filter_by_product(product, remaining);
    }
    remaining
}

/// The greater of the configured threshold and the lowest plan minimum.
pub fn effective_cart_threshold(
    plans: &[FinancePlan],
    configured: Option<Decimal>,
) -> Option<Decimal> {
    let min = plans.iter().map(|plan| plan.credit_minimum).min()?;

    match configured {
        Some(threshold) if to_minor(threshold) > min => Some(threshold),
        _ => Some(from_minor(min)),
    }
}

/// The lesser of the configured maximum and the highest plan maximum.
pub fn effective_cart_max(plans: &[FinancePlan], configured: Option<Decimal>) -> Option<Decimal> {
    let max = plans.iter().map(|plan| plan.credit_maximum).max()?;

    match configured {
        Some(limit) if to_minor(limit) < max => Some(limit),
        _ => Some(from_minor(max)),
    }
}
