//! Narrow view of the merchant's order store used by the lifecycle engine.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;

use crate::models::{FinanceMeta, Order, OrderNote, OrderStatus};

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>>;

    async fn get_finance_meta(&self, order_id: &str) -> Result<Option<FinanceMeta>>;

    async fn set_finance_meta(&self, order_id: &str, meta: &FinanceMeta) -> Result<()>;

    async fn set_order_status(&self, order_id: &str, status: OrderStatus) -> Result<()>;

    async fn add_order_note(&self, order_id: &str, text: &str) -> Result<()>;

    /// Record the payment as taken and complete the order.
    async fn mark_payment_complete(&self, order_id: &str) -> Result<()>;

    /// Insert or replace an order.
    async fn save_order(&self, order: &Order) -> Result<()>;
}

/// DashMap-backed store for tests and single-node deployments without a database.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    orders: Arc<DashMap<String, Order>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self, order_id: &str) -> Vec<String> {
        self.orders
            .get(order_id)
            .map(|order| order.notes.iter().map(|n| n.text.clone()).collect())
            .unwrap_or_default()
    }

    fn update<F>(&self, order_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Order),
    {
        let mut order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| anyhow!("order {} not found", order_id))?;
        f(order.value_mut());
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.orders.get(order_id).map(|o| o.value().clone()))
    }

    async fn get_finance_meta(&self, order_id: &str) -> Result<Option<FinanceMeta>> {
        Ok(self.orders.get(order_id).map(|o| o.finance.clone()))
    }

    async fn set_finance_meta(&self, order_id: &str, meta: &FinanceMeta) -> Result<()> {
        self.update(order_id, |order| order.finance = meta.clone())
    }

    async fn set_order_status(&self, order_id: &str, status: OrderStatus) -> Result<()> {
        self.update(order_id, |order| order.status = status)
    }

    async fn add_order_note(&self, order_id: &str, text: &str) -> Result<()> {
        self.update(order_id, |order| {
            order.notes.push(OrderNote {
                text: text.to_string(),
                created_at: Utc::now(),
            })
        })
    }

    async fn mark_payment_complete(&self, order_id: &str) -> Result<()> {
        self.update(order_id, |order| {
            order.status = OrderStatus::Completed;
            order.paid_at.get_or_insert_with(Utc::now);
        })
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        self.orders.insert(order.id.clone(), order.clone());
        Ok(())
    }
}
