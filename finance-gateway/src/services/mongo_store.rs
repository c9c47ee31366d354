use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mongodb::options::{FindOneOptions, IndexOptions, ReplaceOptions};
use mongodb::{bson::doc, Collection, Database, IndexModel};
use serde::Deserialize;

use crate::models::{FinanceMeta, Order, OrderStatus};
use crate::services::order_store::OrderRepository;

#[derive(Deserialize)]
struct FinanceProjection {
    #[serde(default)]
    finance: FinanceMeta,
}

/// Orders with embedded finance metadata and notes.
#[derive(Clone)]
pub struct MongoOrderRepository {
    orders: Collection<Order>,
}

impl MongoOrderRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            orders: db.collection("orders"),
        }
    }

    pub async fn init_indexes(&self) -> Result<()> {
        let reference_index = IndexModel::builder()
            .keys(doc! { "finance.reference": 1 })
            .options(
                IndexOptions::builder()
                    .name("finance_reference_idx".to_string())
                    .sparse(true)
                    .build(),
            )
            .build();

        let status_index = IndexModel::builder()
            .keys(doc! { "payment_method": 1, "status": 1 })
            .options(
                IndexOptions::builder()
                    .name("payment_method_status_idx".to_string())
                    .build(),
            )
            .build();

        self.orders
            .create_indexes([reference_index, status_index], None)
            .await?;

        tracing::info!("Order store indexes initialized");
        Ok(())
    }

    async fn set_fields(&self, order_id: &str, fields: mongodb::bson::Document) -> Result<()> {
        let result = self
            .orders
            .update_one(doc! { "_id": order_id }, doc! { "$set": fields }, None)
            .await?;

        if result.matched_count == 0 {
            return Err(anyhow!("order {} not found", order_id));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderRepository for MongoOrderRepository {
    async fn get_order(&self, order_id: &str) -> Result<Option<Order>> {
        Ok(self.orders.find_one(doc! { "_id": order_id }, None).await?)
    }

    async fn get_finance_meta(&self, order_id: &str) -> Result<Option<FinanceMeta>> {
        let options = FindOneOptions::builder()
            .projection(doc! { "finance": 1 })
            .build();
        let found = self
            .orders
            .clone_with_type::<FinanceProjection>()
            .find_one(doc! { "_id": order_id }, options)
            .await?;
        Ok(found.map(|projection| projection.finance))
    }

    async fn set_finance_meta(&self, order_id: &str, meta: &FinanceMeta) -> Result<()> {
        self.set_fields(order_id, doc! { "finance": mongodb::bson::to_bson(meta)? })
            .await
    }

    async fn set_order_status(&self, order_id: &str, status: OrderStatus) -> Result<()> {
        self.set_fields(order_id, doc! { "status": mongodb::bson::to_bson(&status)? })
            .await
    }

    async fn add_order_note(&self, order_id: &str, text: &str) -> Result<()> {
        let note = crate::models::OrderNote {
            text: text.to_string(),
            created_at: chrono::Utc::now(),
        };
        let result = self
            .orders
            .update_one(
                doc! { "_id": order_id },
                doc! { "$push": { "notes": mongodb::bson::to_bson(&note)? } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(anyhow!("order {} not found", order_id));
        }
        Ok(())
    }

    async fn mark_payment_complete(&self, order_id: &str) -> Result<()> {
        let paid_at = mongodb::bson::to_bson(&chrono::Utc::now())?;
        let result = self
            .orders
            .update_one(
                doc! { "_id": order_id },
                vec![doc! {
                    "$set": {
                        "status": mongodb::bson::to_bson(&OrderStatus::Completed)?,
                        "paid_at": { "$ifNull": ["$paid_at", paid_at] }
                    }
                }],
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(anyhow!("order {} not found", order_id));
        }
        Ok(())
    }

    async fn save_order(&self, order: &Order) -> Result<()> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.orders
            .replace_one(doc! { "_id": order.id.as_str() }, order, options)
            .await?;
        Ok(())
    }
}
