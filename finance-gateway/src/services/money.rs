use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Major units to integer minor units, rounding half away from zero.
pub fn to_minor(amount: Decimal) -> i64 {
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

pub fn from_minor(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}

/// Two-decimal fixed representation, as persisted on orders.
pub fn format_amount(amount: Decimal) -> String {
    let mut rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(2);
    rounded.to_string()
}
