//! Money helpers. Amounts are whole currency units (VND has no minor unit) stored as `i64`.

use crate::errors::{Error, Result};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Rejects zero and negative amounts.
pub const fn ensure_positive(amount: i64) -> Result<i64> {
    if amount <= 0 {
        return Err(Error::InvalidAmount { amount });
    }
    Ok(amount)
}

/// Mentor's share of a booking price, rounded toward zero.
///
/// `share` must lie in `[0, 1]`, which settings validation guarantees.
pub fn payout_share(price: i64, share: Decimal) -> Result<i64> {
    ensure_positive(price)?;
    let payout = (Decimal::from(price) * share)
        .round_dp_with_strategy(0, RoundingStrategy::ToZero)
        .to_i64()
        .ok_or(Error::InvalidAmount { amount: price })?;
    Ok(payout)
}
