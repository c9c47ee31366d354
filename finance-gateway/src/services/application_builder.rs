//! Maps a cart and its order onto an application payload.
//!
//! Pure and deterministic; no I/O.

use rust_decimal::Decimal;

use crate::config::PlatformConfig;
use crate::models::{
    Applicant, ApplicantAddress, ApplicationMetadata, ApplicationPayload, ApplicationUrls, Cart,
    Order, OrderItem,
};
use crate::services::money::to_minor;

pub const SKU_SHIPPING: &str = "SHPNG";
pub const SKU_TAX: &str = "TAX";
pub const SKU_FEES: &str = "FEES";
pub const SKU_FEE_TAX: &str = "FEE_TAX";
pub const SKU_DISCOUNT: &str = "DSCNT";
pub const SKU_OTHER: &str = "OTHER";

/// Inputs chosen by the shopper at checkout.
#[derive(Debug, Clone)]
pub struct CheckoutSelection {
    pub finance_plan_id: String,
    /// Deposit in minor units.
    pub deposit_amount: i64,
}

pub fn build_application(
    order: &Order,
    cart: &Cart,
    selection: &CheckoutSelection,
    platform: &PlatformConfig,
) -> ApplicationPayload {
    let order_id = order.id.clone();
    let checkout_url = platform.checkout_base_url.clone();

    ApplicationPayload {
        id: None,
        country_id: order.billing.country.clone(),
        finance_plan_id: selection.finance_plan_id.clone(),
        applicants: vec![build_applicant(order)],
        order_items: build_order_items(cart, order.total),
        deposit_amount: selection.deposit_amount,
        finalisation_required: false,
        merchant_reference: order_id.clone(),
        urls: ApplicationUrls {
            merchant_redirect_url: order.received_url.clone().unwrap_or_else(|| {
                format!(
                    "{}/order-received/{}",
                    checkout_url.trim_end_matches('/'),
                    order_id
                )
            }),
            merchant_checkout_url: checkout_url.clone(),
            merchant_response_url: platform.callback_url.clone(),
        },
        metadata: ApplicationMetadata {
            order_number: order_id.clone(),
            ecom_platform: platform.name.clone(),
            ecom_platform_version: platform.version.clone(),
            ecom_base_url: checkout_url,
            plugin_version: platform.plugin_version.clone(),
            merchant_reference: order_id,
        },
    }
}

/// Line items for the cart, plus an `OTHER` adjustment for whatever the
/// itemised lines do not account for in `order_total`.
pub fn build_order_items(cart: &Cart, order_total: Decimal) -> Vec<OrderItem> {
    let mut items = Vec::new();
    let mut running_total = Decimal::ZERO;

    for line in &cart.items {
        let quantity = line.quantity.max(1);
        let unit_price = line.line_subtotal / Decimal::from(quantity);
        running_total += line.line_subtotal;

        items.push(OrderItem {
            name: line.product.name.clone(),
            quantity: i64::from(quantity),
            price: to_minor(unit_price),
            sku: Some(
                line.product
                    .sku
                    .clone()
                    .filter(|sku| !sku.is_empty())
                    .unwrap_or_else(|| line.product.id.clone()),
            ),
        });
    }

    if cart.needs_shipping && cart.shipping_total > Decimal::ZERO {
        items.push(adjustment("Shipping", cart.shipping_total, SKU_SHIPPING));
        running_total += cart.shipping_total;
    }

    for tax in &cart.taxes {
        items.push(adjustment("Taxes", *tax, SKU_TAX));
        running_total += *tax;
    }

    for fee in &cart.fees {
        items.push(adjustment("Fees", fee.amount, SKU_FEES));
        running_total += fee.amount;
        if fee.taxable {
            items.push(adjustment("Fee Tax", fee.tax, SKU_FEE_TAX));
            running_total += fee.tax;
        }
    }

    if !cart.discount_total.is_zero() {
        items.push(adjustment("Discount", -cart.discount_total, SKU_DISCOUNT));
        running_total -= cart.discount_total;
    }

    let other = to_minor(order_total - running_total);
    if other != 0 {
        items.push(OrderItem {
            name: "Other".to_string(),
            quantity: 1,
            price: other,
            sku: Some(SKU_OTHER.to_string()),
        });
    }

    items
}

fn adjustment(name: &str, amount: Decimal, sku: &str) -> OrderItem {
    OrderItem {
        name: name.to_string(),
        quantity: 1,
        price: to_minor(amount),
        sku: Some(sku.to_string()),
    }
}

fn build_applicant(order: &Order) -> Applicant {
    let billing = &order.billing;
    let shipping = &order.shipping;

    let billing_address = ApplicantAddress {
        co: billing.company.clone(),
        postcode: billing.postcode.clone(),
        country: billing.country.clone(),
        text: join_address(&[&billing.address_2, &billing.address_1, &billing.city]),
    };

    let shipping_address = ApplicantAddress {
        co: or_fallback(&shipping.company, &billing.company),
        postcode: or_fallback(&shipping.postcode, &billing.postcode),
        country: or_fallback(&shipping.country, &billing.country),
        text: join_address(&[
            &or_fallback(&shipping.address_2, &billing.address_2),
            &or_fallback(&shipping.address_1, &billing.address_1),
            &or_fallback(&shipping.city, &billing.city),
        ]),
    };

    Applicant {
        first_name: billing.first_name.clone(),
        last_name: billing.last_name.clone(),
        phone_number: billing.phone.chars().filter(|c| !c.is_whitespace()).collect(),
        email: billing.email.clone(),
        addresses: vec![billing_address],
        shipping_address,
    }
}

fn or_fallback(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

fn join_address(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BillingDetails, CartItem, Fee, FinanceMeta, OrderStatus, Product, ShippingDetails,
    };
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn line(name: &str, qty: u32, subtotal: &str) -> CartItem {
        CartItem {
            product: Product {
                id: format!("id-{}", name),
                name: name.to_string(),
                sku: Some(format!("SKU-{}", name)),
                price_including_tax: dec(subtotal),
                finance: None,
                parent: None,
            },
            quantity: qty,
            line_subtotal: dec(subtotal),
        }
    }

    fn order(total: &str) -> Order {
        Order {
            id: "1001".to_string(),
            total: dec(total),
            currency: "GBP".to_string(),
            status: OrderStatus::PendingPayment,
            payment_method: "divido-finance".to_string(),
            billing: BillingDetails {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                phone: "07700 900 123".to_string(),
                email: "ada@example.com".to_string(),
                company: String::new(),
                address_1: "1 Main Street".to_string(),
                address_2: "Flat 2".to_string(),
                city: "London".to_string(),
                postcode: "N1 1AA".to_string(),
                country: "GB".to_string(),
            },
            shipping: ShippingDetails {
                city: "Leeds".to_string(),
                ..Default::default()
            },
            received_url: None,
            finance: FinanceMeta::default(),
            notes: vec![],
            paid_at: None,
        }
    }

    fn cart(items: Vec<CartItem>) -> Cart {
        Cart {
            items,
            ..Default::default()
        }
    }

    #[test]
    fn test_exact_total_has_no_other_line() {
        let cart = cart(vec![line("a", 1, "10.00"), line("b", 1, "5.00")]);
        let items = build_order_items(&cart, dec("15.00"));

        assert_eq!(items.iter().map(|i| i.price * i.quantity).sum::<i64>(), 1500);
        assert!(items.iter().all(|i| i.sku.as_deref() != Some(SKU_OTHER)));
    }

    #[test]
    fn test_residual_becomes_other_line() {
        let cart = cart(vec![line("a", 1, "10.00"), line("b", 1, "5.00")]);
        let items = build_order_items(&cart, dec("15.01"));

        let other = items.last().unwrap();
        assert_eq!(other.sku.as_deref(), Some(SKU_OTHER));
        assert_eq!(other.price, 1);
    }

    #[test]
    fn test_unit_price_from_line_subtotal() {
        let cart = cart(vec![line("a", 3, "10.00")]);
        let items = build_order_items(&cart, dec("10.00"));

        assert_eq!(items[0].quantity, 3);
        assert_eq!(items[0].price, 333);
        assert_eq!(items[0].sku.as_deref(), Some("SKU-a"));
    }

    #[test]
    fn test_adjustment_lines() {
        let cart = Cart {
            items: vec![line("a", 1, "100.00")],
            needs_shipping: true,
            shipping_total: dec("4.99"),
            taxes: vec![dec("20.00")],
            fees: vec![Fee {
                amount: dec("2.00"),
                taxable: true,
                tax: dec("0.40"),
            }],
            discount_total: dec("10.00"),
            total: dec("117.39"),
        };
        let items = build_order_items(&cart, dec("117.39"));
        let skus: Vec<_> = items.iter().filter_map(|i| i.sku.as_deref()).collect();

        assert_eq!(
            skus,
            vec!["SKU-a", SKU_SHIPPING, SKU_TAX, SKU_FEES, SKU_FEE_TAX, SKU_DISCOUNT]
        );
        assert_eq!(items[5].price, -1000);
    }

    #[test]
    fn test_free_shipping_is_not_itemised() {
        let cart = Cart {
            items: vec![line("a", 1, "10.00")],
            needs_shipping: true,
            shipping_total: Decimal::ZERO,
            ..Default::default()
        };
        let items = build_order_items(&cart, dec("10.00"));
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_payload_identity_and_applicant() {
        let order = order("15.00");
        let cart = cart(vec![line("a", 1, "15.00")]);
        let selection = CheckoutSelection {
            finance_plan_id: "plan-1".to_string(),
            deposit_amount: 0,
        };
        let payload = build_application(&order, &cart, &selection, &PlatformConfig::default());

        assert_eq!(payload.merchant_reference, "1001");
        assert_eq!(payload.metadata.order_number, "1001");
        assert_eq!(payload.country_id, "GB");
        assert!(!payload.finalisation_required);

        let applicant = &payload.applicants[0];
        assert_eq!(applicant.phone_number, "07700900123");
        assert_eq!(applicant.addresses[0].text, "Flat 2, 1 Main Street, London");
        assert_eq!(applicant.shipping_address.text, "Flat 2, 1 Main Street, Leeds");
        assert_eq!(applicant.shipping_address.postcode, "N1 1AA");

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["financePlanId"], "plan-1");
        assert_eq!(json["applicants"][0]["firstName"], "Ada");
        assert!(json["applicants"][0]["addresses"][0].get("co").is_none());
        assert!(json.get("id").is_none());
    }
}
