pub mod application_builder;
pub mod availability;
pub mod finance_api;
pub mod lifecycle;
pub mod metrics;
pub mod money;
pub mod mongo_store;
pub mod order_store;
pub mod plans;

#[cfg(test)]
pub(crate) mod fakes;

pub use availability::GatewayAvailability;
pub use finance_api::{FinanceApi, FinanceApiClient};
pub use lifecycle::LifecycleEngine;
pub use metrics::{get_metrics, init_metrics};
pub use mongo_store::MongoOrderRepository;
pub use order_store::{InMemoryOrderRepository, OrderRepository};
pub use plans::PlanCatalog;
