//! Application lifecycle synchronisation.
//!
//! Keeps each financed order in step with its remote application: creation at
//! checkout, provider webhooks, merchant cancel/refund confirmation and
//! fulfilment on completion. Orders are joined to applications by the
//! merchant reference, which is always the local order id.

use serde::Serialize;
use service_core::utils::signature::verify_payload;
use std::sync::Arc;

use crate::config::Config;
use crate::error::GatewayError;
use crate::models::{
    lender_reasons, order_number_from_raw, ActivationRequest, ApplicationStatus, CallbackAck,
    CallbackPayload, CancellationRequest, Cart, ConfirmationPrompt, FinanceMeta, LenderAction,
    OrderItem, OrderStatus, PromptAction, RefundRequest, RemoteApplication, StatusUpdate,
};
use crate::services::application_builder::{build_application, CheckoutSelection};
use crate::services::finance_api::{FinanceApi, FinanceApiError};
use crate::services::metrics::{record_lender_notification, record_webhook};
use crate::services::money::{format_amount, from_minor, to_minor};
use crate::services::order_store::OrderRepository;

pub const SIGNATURE_HEADER: &str = "X-DIVIDO-HMAC-SHA256";
pub const NOTE_PREFIX: &str = "Finance";

const WRONG_ENVIRONMENT_MESSAGE: &str = "It appears you are using a different api key...";
const UNACTIONABLE_MESSAGE: &str = "Unactionable event";

/// Where the shopper goes after a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRedirect {
    pub application_id: String,
    pub redirect: Option<String>,
}

/// How a webhook delivery was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Status mapped onto the order.
    Applied(OrderStatus),
    /// Recognised but unmapped status; audit note only.
    Noted,
    /// Reference did not match; nothing touched.
    Ignored,
    /// Amount drifted since submission; order put on hold.
    Held,
    InvalidSignature,
    Malformed,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookOutcome::Applied(_) => "applied",
            WebhookOutcome::Noted => "noted",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Held => "held",
            WebhookOutcome::InvalidSignature => "invalid_signature",
            WebhookOutcome::Malformed => "malformed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub outcome: WebhookOutcome,
    pub ack: CallbackAck,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "reason", rename_all = "lowercase")]
pub enum FulfillmentOutcome {
    Sent,
    Skipped(&'static str),
}

#[derive(Clone)]
pub struct LifecycleEngine {
    config: Arc<Config>,
    api: Arc<dyn FinanceApi>,
    orders: Arc<dyn OrderRepository>,
}

impl LifecycleEngine {
    pub fn new(
        config: Arc<Config>,
        api: Arc<dyn FinanceApi>,
        orders: Arc<dyn OrderRepository>,
    ) -> Self {
        Self {
            config,
            api,
            orders,
        }
    }

    fn plugin_version(&self) -> &str {
        &self.config.platform.plugin_version
    }

    fn owns(&self, payment_method: &str) -> bool {
        payment_method == self.config.gateway.id
    }

    /// Create the remote application, or replace it when the order already
    /// carries a reference. Finance metadata is only written on success.
    pub async fn submit_application(
        &self,
        order_id: &str,
        cart: &Cart,
        selection: &CheckoutSelection,
    ) -> Result<CheckoutRedirect, GatewayError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;

        let mut payload = build_application(&order, cart, selection, &self.config.platform);
        let existing = order.finance.reference.clone().filter(|r| !r.is_empty());

        let result = match existing {
            None => self.api.create_application(&payload).await,
            Some(reference) => {
                payload.id = Some(reference);
                self.api.update_application(&payload).await
            }
        };

        let application = match result {
            Ok(application) => application,
            Err(err) => {
                tracing::error!(order_id, error = %err, "Finance application rejected");
                let note = format!(
                    "Payment rejected (Application ID: {}) Error: {}",
                    order_id,
                    err.public_message()
                );
                self.orders.add_order_note(order_id, &note).await?;
                return Err(err.into());
            }
        };

        let meta = FinanceMeta {
            reference: Some(application.id.clone()),
            amount: Some(format_amount(order.total)),
            description: Some(
                application
                    .finance_plan
                    .as_ref()
                    .and_then(|plan| plan.description.clone())
                    .unwrap_or_else(|| selection.finance_plan_id.clone()),
            ),
        };
        self.orders.set_finance_meta(order_id, &meta).await?;

        tracing::info!(
            order_id,
            application_id = %application.id,
            updated = payload.id.is_some(),
            "Finance application submitted"
        );

        Ok(CheckoutRedirect {
            application_id: application.id,
            redirect: application.urls.and_then(|urls| urls.application_url),
        })
    }

    /// Verify and apply a provider notification.
    ///
    /// Redelivery of the same notification reapplies the same mapping.
    pub async fn handle_callback(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<CallbackOutcome, GatewayError> {
        let parsed = serde_json::from_slice::<CallbackPayload>(body);

        if let Some(secret) = self.config.finance_api.shared_secret() {
            let valid = match signature {
                Some(provided) => verify_payload(body, secret, provided)?,
                None => false,
            };

            if !valid {
                tracing::warn!("Finance webhook signature mismatch");
                if let Some(order_id) = order_number_from_raw(body) {
                    let note = format!("{} - Webhook rejected: shared secret mismatch", NOTE_PREFIX);
                    if let Err(e) = self.orders.add_order_note(&order_id, &note).await {
                        tracing::warn!(order_id, error = %e, "Could not record signature failure");
                    }
                }
                return Ok(self.finish(
                    WebhookOutcome::InvalidSignature,
                    CallbackAck::error("Invalid Hash error", self.plugin_version()),
                ));
            }
        }

        let payload = match parsed {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed finance webhook");
                return Ok(self.finish(
                    WebhookOutcome::Malformed,
                    CallbackAck::error("Invalid payload", self.plugin_version()),
                ));
            }
        };

        let Some(order_id) = payload.order_number() else {
            tracing::warn!(application_id = %payload.application, "Finance webhook without order number");
            return Ok(self.finish(
                WebhookOutcome::Malformed,
                CallbackAck::error("Missing order number", self.plugin_version()),
            ));
        };

        let Some(order) = self.orders.get_order(&order_id).await? else {
            tracing::info!(order_id, "Finance webhook for unknown order ignored");
            return Ok(self.ignored());
        };

        if order.finance.reference.as_deref() != Some(payload.application.as_str()) {
            tracing::info!(
                order_id,
                application_id = %payload.application,
                "Finance webhook reference mismatch ignored"
            );
            return Ok(self.ignored());
        }

        let expected_amount = format_amount(order.total);
        if order.finance.amount.as_deref() != Some(expected_amount.as_str()) {
            tracing::warn!(
                order_id,
                application_id = %payload.application,
                financed = ?order.finance.amount,
                total = %expected_amount,
                status = %payload.status,
                "Financed amount does not match order total; holding order"
            );
            self.orders
                .set_order_status(&order_id, OrderStatus::OnHold)
                .await?;
            let note = format!(
                "{} - The requested credit of {} did not match the order total of {}; order put on hold",
                NOTE_PREFIX,
                order.finance.amount.as_deref().unwrap_or("(none)"),
                expected_amount
            );
            self.orders.add_order_note(&order_id, &note).await?;
            return Ok(self.finish(
                WebhookOutcome::Held,
                CallbackAck::ok("", self.plugin_version()),
            ));
        }

        let outcome = match ApplicationStatus::parse(&payload.status) {
            Some(ApplicationStatus::Declined) => {
                self.orders
                    .set_order_status(&order_id, OrderStatus::Failed)
                    .await?;
                WebhookOutcome::Applied(OrderStatus::Failed)
            }
            Some(ApplicationStatus::Signed) => {
                self.orders
                    .set_order_status(&order_id, OrderStatus::Processing)
                    .await?;
                WebhookOutcome::Applied(OrderStatus::Processing)
            }
            Some(ApplicationStatus::Ready) => {
                self.orders.mark_payment_complete(&order_id).await?;
                WebhookOutcome::Applied(OrderStatus::Completed)
            }
            Some(ApplicationStatus::Referred) => {
                self.orders
                    .set_order_status(&order_id, OrderStatus::OnHold)
                    .await?;
                WebhookOutcome::Applied(OrderStatus::OnHold)
            }
            Some(ApplicationStatus::Accepted) => {
                self.orders
                    .set_order_status(&order_id, OrderStatus::PendingPayment)
                    .await?;
                WebhookOutcome::Applied(OrderStatus::PendingPayment)
            }
            _ => WebhookOutcome::Noted,
        };

        self.orders
            .add_order_note(&order_id, &format!("Finance status: {}", payload.status))
            .await?;

        tracing::info!(
            order_id,
            application_id = %payload.application,
            status = %payload.status,
            outcome = outcome.as_str(),
            "Finance webhook processed"
        );

        Ok(self.finish(outcome, CallbackAck::ok("", self.plugin_version())))
    }

    fn ignored(&self) -> CallbackOutcome {
        self.finish(
            WebhookOutcome::Ignored,
            CallbackAck::ok("", self.plugin_version()),
        )
    }

    fn finish(&self, outcome: WebhookOutcome, ack: CallbackAck) -> CallbackOutcome {
        record_webhook(outcome.as_str());
        CallbackOutcome { outcome, ack }
    }

    /// Phase one of a cancel or refund: describe what notifying the lender would do.
    pub async fn check_status(
        &self,
        target_status: &str,
        application_id: &str,
    ) -> Result<ConfirmationPrompt, GatewayError> {
        let mut prompt = ConfirmationPrompt::default();

        let application = match self.api.get_application(application_id).await {
            Ok(application) => application,
            Err(err @ FinanceApiError::BadResponse { .. }) => {
                tracing::warn!(application_id, error = %err, "Status check rejected by provider");
                prompt.message = Some(vec![WRONG_ENVIRONMENT_MESSAGE.to_string()]);
                return Ok(prompt);
            }
            Err(err) => return Err(err.into()),
        };

        let order = self.orders.get_order(&application.merchant_reference).await?;
        if !order.is_some_and(|o| self.owns(&o.payment_method)) {
            prompt.bypass = true;
            return Ok(prompt);
        }

        let mut messages = vec![UNACTIONABLE_MESSAGE.to_string()];
        let gateway = &self.config.gateway;

        match target_status.parse::<OrderStatus>() {
            Ok(OrderStatus::Cancelled)
                if gateway.auto_cancel && application.amounts.cancelable_amount > 0 =>
            {
                let amount = display_amount(application.amounts.cancelable_amount, &application);
                prompt.title = "Notify the lender of this cancellation?".to_string();
                messages = vec![format!(
                    "The lender will be asked to cancel {} of finance. Up to {} may no longer be collected from the customer.",
                    amount, amount
                )];
                prompt.notify = true;
                prompt.action = PromptAction::from(LenderAction::Cancel);
            }
            Ok(OrderStatus::Refunded)
                if gateway.auto_refund && application.amounts.refundable_amount > 0 =>
            {
                let amount = display_amount(application.amounts.refundable_amount, &application);
                prompt.title = "Notify the lender of this refund?".to_string();
                messages = vec![format!(
                    "The lender will be asked to refund {} of finance. Up to {} will be returned to the customer's agreement.",
                    amount, amount
                )];
                prompt.notify = true;
                prompt.action = PromptAction::from(LenderAction::Refund);
            }
            _ => {}
        }

        if let Some(lender) = application.lender_name() {
            if let Some(reasons) = lender_reasons(lender) {
                prompt.reasons = Some(reasons);
                messages.push(format!(
                    "{} requests that you provide a reason from the list below:",
                    lender
                ));
            }
        }

        prompt.message = Some(messages);
        Ok(prompt)
    }

    /// Phase two: tell the lender. Never fails; errors become the response message.
    pub async fn update_status(
        &self,
        application_id: &str,
        action: &str,
        reason: Option<String>,
    ) -> StatusUpdate {
        let mut update = StatusUpdate::new(reason.clone());

        match self
            .notify_lender(application_id, action, reason.as_deref())
            .await
        {
            Ok(Some((lender_action, response))) => {
                update.success = true;
                update.response = Some(response);
                update.message = match lender_action {
                    LenderAction::Cancel => "Lender successfully notified of cancellation request",
                    LenderAction::Refund => "Lender successfully notified of refund request",
                }
                .to_string();
            }
            Ok(None) => update.message = "Could not find action".to_string(),
            Err(GatewayError::Api(err @ FinanceApiError::BadResponse { .. })) => {
                update.message = format!(
                    "Application {} not possible: {}",
                    action,
                    err.public_message()
                );
                update.context = err.context().and_then(|c| serde_json::to_value(c).ok());
            }
            Err(GatewayError::OrderNotFound(_)) => {
                update.message = "There was an issue retrieving the order".to_string();
            }
            Err(err) => update.message = err.public_message(),
        }

        update
    }

    async fn notify_lender(
        &self,
        application_id: &str,
        action: &str,
        reason: Option<&str>,
    ) -> Result<Option<(LenderAction, serde_json::Value)>, GatewayError> {
        let application = self.api.get_application(application_id).await?;
        let order_id = application.merchant_reference.clone();

        let order = self
            .orders
            .get_order(&order_id)
            .await?
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.clone()))?;

        if !self.owns(&order.payment_method) {
            return Err(GatewayError::NotFinanced(
                "This order doesn't appear to be financed".to_string(),
            ));
        }

        let Some(lender_action) = LenderAction::parse(action) else {
            return Ok(None);
        };

        let reason = reason.map(str::to_string).filter(|r| !r.is_empty());
        let result = match lender_action {
            LenderAction::Cancel => {
                let request = CancellationRequest {
                    order_items: vec![order_line(
                        &order_id,
                        application.amounts.cancelable_amount,
                    )],
                    reason,
                };
                self.api.cancel(&application.id, &request).await
            }
            LenderAction::Refund => {
                let request = RefundRequest {
                    order_items: vec![order_line(
                        &order_id,
                        application.amounts.refundable_amount,
                    )],
                    reason,
                };
                self.api.refund(&application.id, &request).await
            }
        };

        let response = match result {
            Ok(response) => {
                record_lender_notification(lender_action.as_str(), "ok");
                response
            }
            Err(err) => {
                record_lender_notification(lender_action.as_str(), "error");
                tracing::error!(
                    order_id = %order_id,
                    application_id,
                    action = lender_action.as_str(),
                    error = %err,
                    "Lender notification failed"
                );
                return Err(err.into());
            }
        };

        let note = match lender_action {
            LenderAction::Cancel => "Automatic cancellation request sent to lender",
            LenderAction::Refund => "Automatic refund request sent to lender",
        };
        self.orders
            .add_order_note(&order_id, &format!("{} - {}", NOTE_PREFIX, note))
            .await?;

        tracing::info!(
            order_id = %order_id,
            application_id,
            action = lender_action.as_str(),
            "Lender notified"
        );

        Ok(Some((lender_action, response)))
    }

    /// The merchant saved a cancel or refund without notifying the lender.
    /// The divergence is recorded on the order.
    pub async fn record_unnotified_transition(
        &self,
        order_id: &str,
        action: LenderAction,
    ) -> Result<(), GatewayError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;

        if !self.owns(&order.payment_method) {
            return Err(GatewayError::NotFinanced(
                "This order doesn't appear to be financed".to_string(),
            ));
        }

        let note = format!(
            "{} - Lender not notified of {}; local and remote application states may differ",
            NOTE_PREFIX,
            action.as_str()
        );
        self.orders.add_order_note(order_id, &note).await?;
        record_lender_notification(action.as_str(), "skipped");

        tracing::warn!(
            order_id,
            action = action.as_str(),
            reference = ?order.finance.reference,
            "Local status changed without lender notification"
        );

        Ok(())
    }

    /// Activate the application once the order is completed locally.
    pub async fn send_fulfillment(&self, order_id: &str) -> Result<FulfillmentOutcome, GatewayError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| GatewayError::OrderNotFound(order_id.to_string()))?;

        if !self.owns(&order.payment_method) {
            return Ok(FulfillmentOutcome::Skipped("order is not financed"));
        }

        if !self.config.gateway.auto_fulfillment {
            tracing::debug!(order_id, "Auto fulfillment disabled");
            return Ok(FulfillmentOutcome::Skipped("auto fulfillment is disabled"));
        }

        let reference = self
            .orders
            .get_finance_meta(order_id)
            .await?
            .and_then(|meta| meta.reference)
            .filter(|r| !r.is_empty());
        let Some(reference) = reference else {
            return Ok(FulfillmentOutcome::Skipped("order has no finance reference"));
        };

        let request = ActivationRequest {
            order_items: vec![order_line(order_id, to_minor(order.total))],
            delivery_method: None,
            tracking_number: None,
        };

        if let Err(err) = self.api.activate(&reference, &request).await {
            tracing::error!(
                order_id,
                application_id = %reference,
                error = %err,
                "Automatic fulfillment failed"
            );
            return Err(err.into());
        }

        self.orders
            .add_order_note(
                order_id,
                &format!("{} - Automatic fulfillment request sent", NOTE_PREFIX),
            )
            .await?;

        tracing::info!(order_id, application_id = %reference, "Automatic fulfillment sent");
        Ok(FulfillmentOutcome::Sent)
    }
}

/// The single order-id line used for activations, cancellations and refunds.
fn order_line(order_id: &str, amount_minor: i64) -> OrderItem {
    OrderItem {
        name: format!("Order ID: {}", order_id),
        quantity: 1,
        price: amount_minor,
        sku: None,
    }
}

fn display_amount(amount_minor: i64, application: &RemoteApplication) -> String {
    format!(
        "{} {}",
        format_amount(from_minor(amount_minor)),
        application.currency_code()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Order, ProductFinanceSettings};
    use crate::services::fakes::{order_fixture, FakeFinanceApi};
    use crate::services::order_store::InMemoryOrderRepository;
    use rust_decimal::Decimal;
    use secrecy::Secret;
    use service_core::utils::signature::sign_payload;
    use std::str::FromStr;

    const GATEWAY: &str = "divido-finance";

    struct Harness {
        engine: LifecycleEngine,
        api: Arc<FakeFinanceApi>,
        orders: InMemoryOrderRepository,
    }

    fn harness_with(config: Config) -> Harness {
        let api = Arc::new(FakeFinanceApi::default());
        let orders = InMemoryOrderRepository::new();
        let engine = LifecycleEngine::new(Arc::new(config), api.clone(), Arc::new(orders.clone()));
        Harness {
            engine,
            api,
            orders,
        }
    }

    fn harness() -> Harness {
        harness_with(Config::default())
    }

    async fn financed_order(h: &Harness, id: &str, reference: &str, total: &str, amount: &str) {
        let mut order = order_fixture(id, total);
        order.finance = FinanceMeta {
            reference: Some(reference.to_string()),
            amount: Some(amount.to_string()),
            description: Some("12 months".to_string()),
        };
        h.orders.save_order(&order).await.unwrap();
    }

    async fn stored(h: &Harness, id: &str) -> Order {
        h.orders.get_order(id).await.unwrap().unwrap()
    }

    fn webhook(application: &str, status: &str, order: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "application": application,
            "status": status,
            "metadata": {"order_number": order}
        }))
        .unwrap()
    }

    fn selection() -> CheckoutSelection {
        CheckoutSelection {
            finance_plan_id: "plan-12".to_string(),
            deposit_amount: 0,
        }
    }

    fn cart() -> Cart {
        Cart {
            items: vec![crate::models::CartItem {
                product: crate::models::Product {
                    id: "p1".to_string(),
                    name: "Sofa".to_string(),
                    sku: None,
                    price_including_tax: Decimal::from(500),
                    finance: Some(ProductFinanceSettings::default()),
                    parent: None,
                },
                quantity: 1,
                line_subtotal: Decimal::from(500),
            }],
            total: Decimal::from(500),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_mismatched_reference_is_ignored() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;

        let outcome = h
            .engine
            .handle_callback(&webhook("app-other", "READY", "1001"), None)
            .await
            .unwrap();

        assert_eq!(outcome.outcome, WebhookOutcome::Ignored);
        let order = stored(&h, "1001").await;
        assert_eq!(order.status, OrderStatus::PendingPayment);
        assert!(order.notes.is_empty());
        assert_eq!(order.finance.reference.as_deref(), Some("app-1"));
    }

    #[tokio::test]
    async fn test_amount_mismatch_holds_order() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "520.00", "500.00").await;

        let outcome = h
            .engine
            .handle_callback(&webhook("app-1", "READY", "1001"), None)
            .await
            .unwrap();

        assert_eq!(outcome.outcome, WebhookOutcome::Held);
        let order = stored(&h, "1001").await;
        assert_eq!(order.status, OrderStatus::OnHold);
        assert!(order.paid_at.is_none());
        assert_eq!(order.notes.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_stored_amount_holds_order() {
        let h = harness();
        let mut order = order_fixture("1001", "500.00");
        order.finance.reference = Some("app-1".to_string());
        h.orders.save_order(&order).await.unwrap();

        let outcome = h
            .engine
            .handle_callback(&webhook("app-1", "SIGNED", "1001"), None)
            .await
            .unwrap();
        assert_eq!(outcome.outcome, WebhookOutcome::Held);
    }

    #[tokio::test]
    async fn test_ready_marks_payment_complete() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500", "500.00").await;

        let outcome = h
            .engine
            .handle_callback(&webhook("app-1", "READY", "1001"), None)
            .await
            .unwrap();

        assert_eq!(outcome.outcome, WebhookOutcome::Applied(OrderStatus::Completed));
        assert_eq!(outcome.ack.status, "ok");
        assert_eq!(outcome.ack.platform, "Woocommerce");
        let order = stored(&h, "1001").await;
        assert_eq!(order.status, OrderStatus::Completed);
        assert!(order.paid_at.is_some());
        assert_eq!(h.orders.notes("1001"), vec!["Finance status: READY"]);
    }

    #[tokio::test]
    async fn test_declined_fails_order() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;

        h.engine
            .handle_callback(&webhook("app-1", "DECLINED", "1001"), None)
            .await
            .unwrap();

        assert_eq!(stored(&h, "1001").await.status, OrderStatus::Failed);
    }

    #[tokio::test]
    async fn test_status_mapping_and_redelivery() {
        let cases = [
            ("SIGNED", OrderStatus::Processing),
            ("REFERRED", OrderStatus::OnHold),
            ("ACCEPTED", OrderStatus::PendingPayment),
        ];

        for (status, expected) in cases {
            let h = harness();
            financed_order(&h, "1001", "app-1", "500.00", "500.00").await;
            let body = webhook("app-1", status, "1001");

            h.engine.handle_callback(&body, None).await.unwrap();
            h.engine.handle_callback(&body, None).await.unwrap();

            assert_eq!(stored(&h, "1001").await.status, expected, "{}", status);
            assert_eq!(h.orders.notes("1001").len(), 2);
        }
    }

    #[tokio::test]
    async fn test_unmapped_status_only_adds_note() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;

        let outcome = h
            .engine
            .handle_callback(&webhook("app-1", "DEPOSIT-PAID", "1001"), None)
            .await
            .unwrap();

        assert_eq!(outcome.outcome, WebhookOutcome::Noted);
        assert_eq!(stored(&h, "1001").await.status, OrderStatus::PendingPayment);
        assert_eq!(h.orders.notes("1001"), vec!["Finance status: DEPOSIT-PAID"]);
    }

    #[tokio::test]
    async fn test_signature_required_when_secret_set() {
        let mut config = Config::default();
        config.finance_api.shared_secret = Secret::new("shh".to_string());
        let h = harness_with(config);
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;
        let body = webhook("app-1", "READY", "1001");

        let rejected = h.engine.handle_callback(&body, Some("bogus")).await.unwrap();
        assert_eq!(rejected.outcome, WebhookOutcome::InvalidSignature);
        assert_eq!(rejected.ack.status, "error");
        assert_eq!(rejected.ack.message, "Invalid Hash error");
        assert_eq!(stored(&h, "1001").await.status, OrderStatus::PendingPayment);
        assert_eq!(h.orders.notes("1001").len(), 1);

        let unsigned = h.engine.handle_callback(&body, None).await.unwrap();
        assert_eq!(unsigned.outcome, WebhookOutcome::InvalidSignature);

        let signature = sign_payload(&body, "shh").unwrap();
        let accepted = h.engine.handle_callback(&body, Some(&signature)).await.unwrap();
        assert_eq!(accepted.outcome, WebhookOutcome::Applied(OrderStatus::Completed));
    }

    #[tokio::test]
    async fn test_signature_failure_noted_for_partial_payload() {
        let mut config = Config::default();
        config.finance_api.shared_secret = Secret::new("shh".to_string());
        let h = harness_with(config);
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;
        let body = br#"{"metadata":{"order_number":1001}}"#;

        let rejected = h.engine.handle_callback(body, Some("bogus")).await.unwrap();

        assert_eq!(rejected.outcome, WebhookOutcome::InvalidSignature);
        assert_eq!(
            h.orders.notes("1001"),
            vec!["Finance - Webhook rejected: shared secret mismatch"]
        );
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let h = harness();
        let outcome = h.engine.handle_callback(b"not json", None).await.unwrap();
        assert_eq!(outcome.outcome, WebhookOutcome::Malformed);
        assert_eq!(outcome.ack.status, "error");
    }

    #[tokio::test]
    async fn test_submit_creates_then_updates_same_application() {
        let h = harness();
        h.orders.save_order(&order_fixture("1001", "500.00")).await.unwrap();

        let first = h
            .engine
            .submit_application("1001", &cart(), &selection())
            .await
            .unwrap();
        let after_create = stored(&h, "1001").await.finance;

        let second = h
            .engine
            .submit_application("1001", &cart(), &selection())
            .await
            .unwrap();
        let after_update = stored(&h, "1001").await.finance;

        assert_eq!(first.application_id, second.application_id);
        assert_eq!(after_create.reference, after_update.reference);
        assert_eq!(after_update.amount.as_deref(), Some("500.00"));
        assert_eq!(after_update.description.as_deref(), Some("plan-12"));
        assert_eq!(
            h.api.calls(),
            vec![
                "create".to_string(),
                format!("update:{}", first.application_id)
            ]
        );
    }

    #[tokio::test]
    async fn test_submit_failure_persists_nothing() {
        let h = harness();
        h.orders.save_order(&order_fixture("1001", "500.00")).await.unwrap();
        h.api.fail_next_with_bad_response("Plan not available");

        let err = h
            .engine
            .submit_application("1001", &cart(), &selection())
            .await
            .unwrap_err();

        assert_eq!(err.public_message(), "Plan not available");
        let order = stored(&h, "1001").await;
        assert_eq!(order.finance, FinanceMeta::default());
        assert_eq!(
            h.orders.notes("1001"),
            vec!["Payment rejected (Application ID: 1001) Error: Plan not available"]
        );
    }

    #[tokio::test]
    async fn test_check_status_cancel_prompt_with_reasons() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;
        h.api.set_application("app-1", "1001", 50000, 0, "novuna");

        let prompt = h.engine.check_status("wc-cancelled", "app-1").await.unwrap();

        assert!(prompt.notify);
        assert!(!prompt.bypass);
        assert_eq!(prompt.action, PromptAction::Cancel);
        assert_eq!(prompt.reasons.as_ref().unwrap().len(), 7);
        let messages = prompt.message.unwrap();
        assert!(messages[0].contains("500.00 GBP"));
        assert_eq!(
            messages[1],
            "novuna requests that you provide a reason from the list below:"
        );
    }

    #[tokio::test]
    async fn test_check_status_defaults_when_not_actionable() {
        let mut config = Config::default();
        config.gateway.auto_refund = false;
        let h = harness_with(config);
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;
        h.api.set_application("app-1", "1001", 0, 50000, "other");

        let prompt = h.engine.check_status("wc-refunded", "app-1").await.unwrap();

        assert!(!prompt.notify);
        assert_eq!(prompt.action, PromptAction::Proceed);
        assert_eq!(prompt.title, "Do you wish to proceed?");
        assert_eq!(prompt.message, Some(vec![UNACTIONABLE_MESSAGE.to_string()]));
        assert!(prompt.reasons.is_none());
    }

    #[tokio::test]
    async fn test_check_status_nothing_left_to_cancel() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;
        h.api.set_application("app-1", "1001", 0, 0, "other");

        let prompt = h.engine.check_status("wc-cancelled", "app-1").await.unwrap();
        assert!(!prompt.notify);
        assert_eq!(prompt.action, PromptAction::Proceed);
    }

    #[tokio::test]
    async fn test_check_status_bypasses_foreign_orders() {
        let h = harness();
        let mut order = order_fixture("1001", "500.00");
        order.payment_method = "card".to_string();
        h.orders.save_order(&order).await.unwrap();
        h.api.set_application("app-1", "1001", 50000, 0, "novuna");

        let prompt = h.engine.check_status("wc-cancelled", "app-1").await.unwrap();
        assert!(prompt.bypass);
        assert!(!prompt.notify);
    }

    #[tokio::test]
    async fn test_check_status_wrong_environment_message() {
        let h = harness();
        h.api.fail_next_with_bad_response("Unauthorized");

        let prompt = h.engine.check_status("wc-cancelled", "app-1").await.unwrap();
        assert_eq!(
            prompt.message,
            Some(vec![WRONG_ENVIRONMENT_MESSAGE.to_string()])
        );
        assert!(!prompt.notify);
    }

    #[tokio::test]
    async fn test_update_status_cancels_full_amount() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;
        h.api.set_application("app-1", "1001", 42000, 0, "novuna");

        let update = h
            .engine
            .update_status("app-1", "cancel", Some("GOODS_FAULTY".to_string()))
            .await;

        assert!(update.success);
        assert_eq!(
            update.message,
            "Lender successfully notified of cancellation request"
        );
        assert_eq!(update.reason.as_deref(), Some("GOODS_FAULTY"));

        let body = h.api.last_body().unwrap();
        assert_eq!(body["orderItems"][0]["name"], "Order ID: 1001");
        assert_eq!(body["orderItems"][0]["quantity"], 1);
        assert_eq!(body["orderItems"][0]["price"], 42000);
        assert_eq!(body["reason"], "GOODS_FAULTY");
        assert_eq!(h.orders.notes("1001").len(), 1);
    }

    #[tokio::test]
    async fn test_update_status_failure_messages() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;
        h.api.set_application("app-1", "1001", 0, 1000, "other");

        let unknown = h.engine.update_status("app-1", "explode", None).await;
        assert!(!unknown.success);
        assert_eq!(unknown.message, "Could not find action");

        let mut foreign = order_fixture("2002", "10.00");
        foreign.payment_method = "card".to_string();
        h.orders.save_order(&foreign).await.unwrap();
        h.api.set_application("app-2", "2002", 0, 1000, "other");
        let not_financed = h.engine.update_status("app-2", "refund", None).await;
        assert_eq!(not_financed.message, "This order doesn't appear to be financed");

        h.api.set_application("app-3", "3003", 0, 1000, "other");
        let missing = h.engine.update_status("app-3", "refund", None).await;
        assert_eq!(missing.message, "There was an issue retrieving the order");

        h.api.fail_next_with_bad_response("Already refunded");
        let bad = h.engine.update_status("app-1", "refund", None).await;
        assert_eq!(bad.message, "Application refund not possible: Already refunded");
        assert_eq!(bad.context.unwrap()["action"], "APPLICATION");
    }

    #[tokio::test]
    async fn test_unnotified_transition_is_recorded() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;

        h.engine
            .record_unnotified_transition("1001", LenderAction::Refund)
            .await
            .unwrap();

        let notes = h.orders.notes("1001");
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("Lender not notified of refund"));
    }

    #[tokio::test]
    async fn test_fulfillment_activates_full_total() {
        let h = harness();
        financed_order(&h, "1001", "app-1", "500.10", "500.10").await;

        let outcome = h.engine.send_fulfillment("1001").await.unwrap();

        assert_eq!(outcome, FulfillmentOutcome::Sent);
        assert_eq!(h.api.calls(), vec!["activate:app-1".to_string()]);
        assert_eq!(h.api.last_body().unwrap()["orderItems"][0]["price"], 50010);
    }

    #[tokio::test]
    async fn test_fulfillment_skips_when_disabled_or_foreign() {
        let mut config = Config::default();
        config.gateway.auto_fulfillment = false;
        let h = harness_with(config);
        financed_order(&h, "1001", "app-1", "500.00", "500.00").await;

        assert_eq!(
            h.engine.send_fulfillment("1001").await.unwrap(),
            FulfillmentOutcome::Skipped("auto fulfillment is disabled")
        );

        let mut foreign = order_fixture("2002", "10.00");
        foreign.payment_method = "card".to_string();
        h.orders.save_order(&foreign).await.unwrap();
        assert!(matches!(
            h.engine.send_fulfillment("2002").await.unwrap(),
            FulfillmentOutcome::Skipped(_)
        ));
        assert!(h.api.calls().is_empty());
    }

    #[test]
    fn test_gateway_id_default() {
        assert_eq!(Config::default().gateway.id, GATEWAY);
        assert_eq!(format_amount(Decimal::from_str("1.5").unwrap()), "1.50");
    }
}
