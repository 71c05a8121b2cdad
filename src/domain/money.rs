//! Fixed-point money helpers.
//!
//! All amounts are `BigDecimal` in major units internally; the gateway
//! boundary speaks integer minor units (kobo) only.

use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, ToPrimitive};

use crate::error::AppError;

/// Minor units per major unit (100 kobo to the naira).
const MINOR_PER_MAJOR: i64 = 100;

/// Converts a major-unit amount to integer minor units.
///
/// Rejects amounts with sub-minor-unit precision (e.g. 10.005) instead of
/// silently rounding, since rounding at this boundary would break exact
/// split-sum checks downstream.
pub fn to_minor_units(amount: &BigDecimal) -> Result<i64, AppError> {
    let minor = amount.clone() * BigDecimal::from(MINOR_PER_MAJOR);
    if !minor.is_integer() {
        return Err(AppError::Validation(format!(
            "amount {} has sub-minor-unit precision",
            amount
        )));
    }
    minor
        .with_scale(0)
        .to_i64()
        .ok_or_else(|| AppError::Validation(format!("amount {} out of range", amount)))
}

/// Converts integer minor units back to a major-unit decimal. Exact.
pub fn from_minor_units(minor: i64) -> BigDecimal {
    BigDecimal::new(BigInt::from(minor), 2)
}

/// Rejects zero and negative amounts before they reach the ledger.
pub fn require_positive(amount: &BigDecimal) -> Result<(), AppError> {
    if amount.sign() != bigdecimal::num_bigint::Sign::Plus {
        return Err(AppError::Validation(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    Ok(())
}
