#![allow(dead_code)]

use finance_gateway::config::{AdminConfig, Config, FinanceApiConfig, GatewaySettings};
use finance_gateway::models::{FinanceMeta, Order, OrderStatus};
use finance_gateway::services::{InMemoryOrderRepository, OrderRepository};
use finance_gateway::startup::Application;
use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::utils::signature::sign_payload;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use wiremock::MockServer;

pub const API_KEY: &str = "sandbox_test.key";
pub const SHARED_SECRET: &str = "test-shared-secret";
pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const GATEWAY_ID: &str = "divido-finance";

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub provider: MockServer,
    pub orders: InMemoryOrderRepository,
    pub client: reqwest::Client,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with<F>(customise: F) -> Self
    where
        F: FnOnce(&mut Config),
    {
        let provider = MockServer::start().await;

        let mut config = Config {
            service_name: "finance-gateway-test".to_string(),
            gateway: GatewaySettings {
                enabled: true,
                ..Default::default()
            },
            finance_api: FinanceApiConfig {
                api_key: Secret::new(API_KEY.to_string()),
                base_url: Some(provider.uri()),
                shared_secret: Secret::new(SHARED_SECRET.to_string()),
                request_timeout: Duration::from_secs(5),
                plan_cache_ttl: None,
            },
            admin: AdminConfig {
                token: Secret::new(ADMIN_TOKEN.to_string()),
            },
            ..Default::default()
        };
        config.common.host = "127.0.0.1".to_string();
        config.common.port = 0; // Random port
        customise(&mut config);

        let orders = InMemoryOrderRepository::new();
        let app = Application::build_with_repository(config, Arc::new(orders.clone()))
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            provider,
            orders,
            client,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Store a pending order paid with this gateway.
    pub async fn seed_order(&self, id: &str, total: &str, finance: FinanceMeta) -> Order {
        let order = Order {
            id: id.to_string(),
            total: Decimal::from_str(total).unwrap(),
            currency: "GBP".to_string(),
            status: OrderStatus::PendingPayment,
            payment_method: GATEWAY_ID.to_string(),
            billing: serde_json::from_value(serde_json::json!({
                "first_name": "Ann",
                "last_name": "Smith",
                "phone": "07700 900 123",
                "email": "ann@example.com",
                "address_1": "1 High Street",
                "city": "London",
                "postcode": "E1 6AN",
                "country": "GB"
            }))
            .unwrap(),
            shipping: Default::default(),
            received_url: None,
            finance,
            notes: vec![],
            paid_at: None,
        };
        self.orders.save_order(&order).await.unwrap();
        order
    }

    pub async fn order(&self, id: &str) -> Order {
        self.orders.get_order(id).await.unwrap().unwrap()
    }

    pub async fn post_webhook(&self, body: &serde_json::Value, secret: &str) -> reqwest::Response {
        let raw = serde_json::to_vec(body).unwrap();
        let signature = sign_payload(&raw, secret).unwrap();

        self.client
            .post(self.url("/webhooks/finance"))
            .header("Content-Type", "application/json")
            .header("X-DIVIDO-HMAC-SHA256", signature)
            .body(raw)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .expect("Failed to execute request")
    }
}

pub fn financed(reference: &str, amount: &str) -> FinanceMeta {
    FinanceMeta {
        reference: Some(reference.to_string()),
        amount: Some(amount.to_string()),
        description: Some("12 Month Interest Free".to_string()),
    }
}

pub fn application_body(id: &str, order_id: &str, cancelable: i64, refundable: i64) -> serde_json::Value {
    serde_json::json!({
        "data": {
            "id": id,
            "merchant_reference": order_id,
            "amounts": {
                "cancelable_amount": cancelable,
                "refundable_amount": refundable
            },
            "currency": {"id": "GBP"},
            "lender": {"app_name": "novuna"},
            "finance_plan": {"description": "12 Month Interest Free"},
            "urls": {"application_url": format!("https://apply.example.test/{}", id)}
        }
    })
}
