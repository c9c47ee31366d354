mod common;

use common::{financed, TestApp, SHARED_SECRET};
use finance_gateway::models::OrderStatus;
use serde_json::json;

fn notification(application: &str, status: &str, order: &str) -> serde_json::Value {
    json!({
        "application": application,
        "status": status,
        "metadata": {"order_number": order}
    })
}

#[tokio::test]
async fn ready_webhook_completes_order() {
    let app = TestApp::spawn().await;
    app.seed_order("1001", "500.00", financed("app-1", "500.00")).await;

    let response = app
        .post_webhook(&notification("app-1", "READY", "1001"), SHARED_SECRET)
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let ack: serde_json::Value = response.json().await.unwrap();
    assert_eq!(ack["status"], "ok");
    assert_eq!(ack["platform"], "Woocommerce");
    assert!(ack["plugin_version"].is_string());

    let order = app.order("1001").await;
    assert_eq!(order.status, OrderStatus::Completed);
    assert!(order.paid_at.is_some());
    assert_eq!(app.orders.notes("1001"), vec!["Finance status: READY"]);
}

#[tokio::test]
async fn numeric_order_number_is_accepted() {
    let app = TestApp::spawn().await;
    app.seed_order("42", "100.00", financed("app-42", "100.00")).await;

    let body = json!({
        "application": "app-42",
        "status": "SIGNED",
        "metadata": {"order_number": 42}
    });
    let response = app.post_webhook(&body, SHARED_SECRET).await;

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(app.order("42").await.status, OrderStatus::Processing);
}

#[tokio::test]
async fn wrong_secret_is_rejected_without_state_change() {
    let app = TestApp::spawn().await;
    app.seed_order("1001", "500.00", financed("app-1", "500.00")).await;

    let response = app
        .post_webhook(&notification("app-1", "READY", "1001"), "not-the-secret")
        .await;

    assert_eq!(response.status().as_u16(), 200);
    let ack: serde_json::Value = response.json().await.unwrap();
    assert_eq!(ack["status"], "error");
    assert_eq!(ack["message"], "Invalid Hash error");

    let order = app.order("1001").await;
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert!(order.paid_at.is_none());
}

#[tokio::test]
async fn unsigned_webhook_is_rejected_when_secret_configured() {
    let app = TestApp::spawn().await;
    app.seed_order("1001", "500.00", financed("app-1", "500.00")).await;

    let response = app
        .client
        .post(app.url("/webhooks/finance"))
        .json(&notification("app-1", "READY", "1001"))
        .send()
        .await
        .unwrap();

    let ack: serde_json::Value = response.json().await.unwrap();
    assert_eq!(ack["status"], "error");
    assert_eq!(app.order("1001").await.status, OrderStatus::PendingPayment);
}

#[tokio::test]
async fn foreign_application_is_ignored() {
    let app = TestApp::spawn().await;
    app.seed_order("1001", "500.00", financed("app-1", "500.00")).await;

    let response = app
        .post_webhook(&notification("app-999", "DECLINED", "1001"), SHARED_SECRET)
        .await;

    let ack: serde_json::Value = response.json().await.unwrap();
    assert_eq!(ack["status"], "ok");
    assert_eq!(app.order("1001").await.status, OrderStatus::PendingPayment);
    assert!(app.orders.notes("1001").is_empty());
}

#[tokio::test]
async fn changed_total_puts_order_on_hold() {
    let app = TestApp::spawn().await;
    app.seed_order("1001", "650.00", financed("app-1", "500.00")).await;

    app.post_webhook(&notification("app-1", "READY", "1001"), SHARED_SECRET)
        .await;

    let order = app.order("1001").await;
    assert_eq!(order.status, OrderStatus::OnHold);
    assert!(order.paid_at.is_none());
}

#[tokio::test]
async fn unsigned_webhook_is_trusted_without_secret() {
    let app = TestApp::spawn_with(|config| {
        config.finance_api.shared_secret = secrecy::Secret::new(String::new());
    })
    .await;
    app.seed_order("1001", "500.00", financed("app-1", "500.00")).await;

    app.client
        .post(app.url("/webhooks/finance"))
        .json(&notification("app-1", "REFERRED", "1001"))
        .send()
        .await
        .unwrap();

    assert_eq!(app.order("1001").await.status, OrderStatus::OnHold);
}
