use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Finance plans
// ---------------------------------------------------------------------------

/// A financing offer as defined by the provider. Credit bounds are in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinancePlan {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub credit_minimum: i64,
    pub credit_maximum: i64,
}

/// Plan record as returned by `GET /finance-plans`.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanRecord {
    pub id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub credit_amount: CreditAmount,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreditAmount {
    #[serde(default)]
    pub minimum_amount: i64,
    #[serde(default)]
    pub maximum_amount: i64,
}

impl From<PlanRecord> for FinancePlan {
    fn from(record: PlanRecord) -> Self {
        Self {
            id: record.id,
            name: record.description,
            active: record.active,
            credit_minimum: record.credit_amount.minimum_amount,
            credit_maximum: record.credit_amount.maximum_amount,
        }
    }
}

// ---------------------------------------------------------------------------
// Orders (owned by the merchant's store)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OrderStatus {
    PendingPayment,
    Processing,
    OnHold,
    Completed,
    Cancelled,
    Refunded,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pending-payment",
            OrderStatus::Processing => "processing",
            OrderStatus::OnHold => "on-hold",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
            OrderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    /// Accepts both `cancelled` and the admin UI's `wc-cancelled` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim();
        let code = code.strip_prefix("wc-").unwrap_or(code);
        match code {
            "pending" | "pending-payment" => Ok(OrderStatus::PendingPayment),
            "processing" => Ok(OrderStatus::Processing),
            "on-hold" => Ok(OrderStatus::OnHold),
            "completed" => Ok(OrderStatus::Completed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "refunded" => Ok(OrderStatus::Refunded),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

/// Finance metadata mirrored onto an order.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct FinanceMeta {
    /// Remote application id.
    pub reference: Option<String>,
    /// Order total at submission, two-decimal fixed string.
    pub amount: Option<String>,
    /// Chosen plan description.
    pub description: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BillingDetails {
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: String,
    pub company: String,
    pub address_1: String,
    pub address_2: String,
    pub city: String,
    pub postcode: String,
    pub country: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ShippingDetails {
    pub company: String,
    pub address_1: String,
    pub address_2: String,
    pub city: String,
    pub postcode: String,
    pub country: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrderNote {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub total: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_method: String,
    #[serde(default)]
    pub billing: BillingDetails,
    #[serde(default)]
    pub shipping: ShippingDetails,
    /// Where the shopper lands after the provider's hosted application.
    #[serde(default)]
    pub received_url: Option<String>,
    #[serde(default)]
    pub finance: FinanceMeta,
    #[serde(default)]
    pub notes: Vec<OrderNote>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Cart snapshot submitted at checkout
// ---------------------------------------------------------------------------

/// Per-product plan restriction, as edited on the product's finance tab.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProductFinanceSettings {
    /// `true` when the merchant selected specific plans for this product.
    #[serde(default)]
    pub restricted: bool,
    #[serde(default)]
    pub plans: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Product {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub price_including_tax: Decimal,
    #[serde(default)]
    pub finance: Option<ProductFinanceSettings>,
    /// Parent product for variations; plan settings are inherited from it.
    #[serde(default)]
    pub parent: Option<Box<Product>>,
}

impl Product {
    /// Explicit plan allow-list for this product, if one is attached.
    pub fn plan_allow_list(&self) -> Option<&[String]> {
        let settings = match &self.parent {
            Some(parent) => parent.finance.as_ref(),
            None => self.finance.as_ref(),
        }?;

        (settings.restricted && !settings.plans.is_empty()).then_some(settings.plans.as_slice())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CartItem {
    pub product: Product,
    pub quantity: u32,
    pub line_subtotal: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Fee {
    pub amount: Decimal,
    #[serde(default)]
    pub taxable: bool,
    #[serde(default)]
    pub tax: Decimal,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Cart {
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub needs_shipping: bool,
    #[serde(default)]
    pub shipping_total: Decimal,
    #[serde(default)]
    pub taxes: Vec<Decimal>,
    #[serde(default)]
    pub fees: Vec<Fee>,
    #[serde(default)]
    pub discount_total: Decimal,
    #[serde(default)]
    pub total: Decimal,
}

impl Cart {
    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.items.iter().map(|item| &item.product)
    }
}

// ---------------------------------------------------------------------------
// Remote application payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub name: String,
    pub quantity: i64,
    /// Unit price in minor units.
    pub price: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

#[derive(Debug, Serialize, Clone, Default, PartialEq, Eq)]
pub struct ApplicantAddress {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub co: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub postcode: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub country: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Applicant {
    pub first_name: String,
    pub last_name: String,
    pub phone_number: String,
    pub email: String,
    pub addresses: Vec<ApplicantAddress>,
    pub shipping_address: ApplicantAddress,
}

#[derive(Debug, Serialize, Clone)]
pub struct ApplicationUrls {
    pub merchant_redirect_url: String,
    pub merchant_checkout_url: String,
    pub merchant_response_url: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct ApplicationMetadata {
    pub order_number: String,
    pub ecom_platform: String,
    pub ecom_platform_version: String,
    pub ecom_base_url: String,
    pub plugin_version: String,
    pub merchant_reference: String,
}

/// Body of `POST /applications` and `PATCH /application/{id}`.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub country_id: String,
    pub finance_plan_id: String,
    pub applicants: Vec<Applicant>,
    pub order_items: Vec<OrderItem>,
    pub deposit_amount: i64,
    pub finalisation_required: bool,
    pub merchant_reference: String,
    pub urls: ApplicationUrls,
    pub metadata: ApplicationMetadata,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRequest {
    pub order_items: Vec<OrderItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CancellationRequest {
    pub order_items: Vec<OrderItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    pub order_items: Vec<OrderItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ---------------------------------------------------------------------------
// Remote application lifecycle
// ---------------------------------------------------------------------------

/// Provider-owned application status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationStatus {
    Accepted,
    ActionLender,
    Canceled,
    Completed,
    Declined,
    DepositPaid,
    AwaitingActivation,
    Fulfilled,
    Referred,
    Signed,
    Ready,
}

impl ApplicationStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACCEPTED" => Some(Self::Accepted),
            "ACTION-LENDER" => Some(Self::ActionLender),
            "CANCELED" => Some(Self::Canceled),
            "COMPLETED" => Some(Self::Completed),
            "DECLINED" => Some(Self::Declined),
            "DEPOSIT-PAID" => Some(Self::DepositPaid),
            "AWAITING-ACTIVATION" => Some(Self::AwaitingActivation),
            "FULFILLED" => Some(Self::Fulfilled),
            "REFERRED" => Some(Self::Referred),
            "SIGNED" => Some(Self::Signed),
            "READY" => Some(Self::Ready),
            _ => None,
        }
    }
}

/// The `.data` object of an application response.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteApplication {
    pub id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub merchant_reference: String,
    #[serde(default)]
    pub amounts: ApplicationAmounts,
    #[serde(default)]
    pub currency: Option<CurrencyRef>,
    #[serde(default)]
    pub lender: Option<LenderRef>,
    #[serde(default)]
    pub finance_plan: Option<PlanRef>,
    #[serde(default)]
    pub urls: Option<RemoteUrls>,
}

impl RemoteApplication {
    pub fn currency_code(&self) -> &str {
        self.currency.as_ref().map(|c| c.id.as_str()).unwrap_or_default()
    }

    pub fn lender_name(&self) -> Option<&str> {
        self.lender.as_ref().map(|l| l.app_name.as_str())
    }
}

/// Outstanding amounts in minor units.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApplicationAmounts {
    #[serde(default)]
    pub cancelable_amount: i64,
    #[serde(default)]
    pub refundable_amount: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CurrencyRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LenderRef {
    #[serde(default)]
    pub app_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanRef {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUrls {
    #[serde(default)]
    pub application_url: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// Webhook notification body.
#[derive(Debug, Deserialize)]
pub struct CallbackPayload {
    pub application: String,
    pub status: String,
    #[serde(default)]
    pub metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackMetadata {
    /// Sent as either a JSON string or number.
    #[serde(default)]
    pub order_number: Option<serde_json::Value>,
}

impl CallbackPayload {
    pub fn order_number(&self) -> Option<String> {
        order_number_value(self.metadata.as_ref()?.order_number.as_ref()?)
    }
}

/// `metadata.order_number` from any JSON body, whether or not it is a full payload.
pub fn order_number_from_raw(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    order_number_value(value.get("metadata")?.get("order_number")?)
}

fn order_number_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Compensating action sent to the lender after a local status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LenderAction {
    Cancel,
    Refund,
}

impl LenderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LenderAction::Cancel => "cancel",
            LenderAction::Refund => "refund",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "cancel" => Some(LenderAction::Cancel),
            "refund" => Some(LenderAction::Refund),
            _ => None,
        }
    }
}

/// Reason codes some lenders require with a cancellation or refund.
pub fn lender_reasons(lender: &str) -> Option<BTreeMap<String, String>> {
    const NOVUNA: &[(&str, &str)] = &[
        ("ALTERNATIVE_PAYMENT_METHOD_USED", "Alternative Payment Method Used"),
        ("GOODS_FAULTY", "Goods Faulty"),
        ("GOODS_NOT_RECEIVED", "Goods Not Received"),
        ("GOODS_RETURNED", "Goods Returned"),
        ("LOAN_AMENDED", "Loan Amended"),
        ("NOT_GOING_AHEAD", "Not Going Ahead"),
        ("NO_CUSTOMER_INFORMATION", "No Customer Information"),
    ];

    let reasons = match lender {
        "novuna" => NOVUNA,
        _ => return None,
    };

    Some(
        reasons
            .iter()
            .map(|(code, label)| (code.to_string(), label.to_string()))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// Lifecycle responses
// ---------------------------------------------------------------------------

/// Acknowledgement returned to the provider for every webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackAck {
    pub status: String,
    pub message: String,
    pub platform: String,
    pub plugin_version: String,
}

impl CallbackAck {
    pub fn ok(message: impl Into<String>, plugin_version: &str) -> Self {
        Self::new("ok", message, plugin_version)
    }

    pub fn error(message: impl Into<String>, plugin_version: &str) -> Self {
        Self::new("error", message, plugin_version)
    }

    fn new(status: &str, message: impl Into<String>, plugin_version: &str) -> Self {
        Self {
            status: status.to_string(),
            message: message.into(),
            platform: "Woocommerce".to_string(),
            plugin_version: plugin_version.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptAction {
    Proceed,
    Cancel,
    Refund,
}

impl From<LenderAction> for PromptAction {
    fn from(action: LenderAction) -> Self {
        match action {
            LenderAction::Cancel => PromptAction::Cancel,
            LenderAction::Refund => PromptAction::Refund,
        }
    }
}

/// Answer to the admin status check shown before a cancel or refund is saved.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationPrompt {
    pub message: Option<Vec<String>>,
    pub reasons: Option<BTreeMap<String, String>>,
    pub notify: bool,
    pub bypass: bool,
    pub action: PromptAction,
    pub title: String,
}

impl Default for ConfirmationPrompt {
    fn default() -> Self {
        Self {
            message: None,
            reasons: None,
            notify: false,
            bypass: false,
            action: PromptAction::Proceed,
            title: "Do you wish to proceed?".to_string(),
        }
    }
}

/// Result of notifying the lender about a cancellation or refund.
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    pub success: bool,
    pub message: String,
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl StatusUpdate {
    pub fn new(reason: Option<String>) -> Self {
        Self {
            success: false,
            message: "Nothing happened".to_string(),
            reason,
            response: None,
            context: None,
        }
    }
}
