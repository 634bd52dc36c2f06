//! Money arithmetic with fixed 2-decimal rounding.
//!
//! Every stored amount in the engine is rounded half-up to 2 decimal places,
//! and tax is derived per line from the gross subtotal, never from a single
//! rounding of the aggregate. The national authority validates amounts at
//! line-level precision.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{DomainError, DomainResult};

/// Round half-up to 2 decimal places.
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Net/tax parts of a gross amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxParts {
    pub net: Decimal,
    pub tax: Decimal,
}

/// Derive the net amount and tax amount contained in a gross subtotal.
///
/// `net = round2(gross / (1 + rate/100))`, `tax = round2(gross - net)`.
/// Both parts are rounded to 2 decimals, so `net + tax == gross` holds
/// exactly for any 2-decimal gross input.
pub fn breakdown(gross: Decimal, rate_percent: Decimal) -> DomainResult<TaxParts> {
    if gross < Decimal::ZERO {
        return Err(DomainError::validation("gross amount cannot be negative"));
    }
    if rate_percent < Decimal::ZERO || rate_percent > Decimal::ONE_HUNDRED {
        return Err(DomainError::validation(format!(
            "tax rate must be between 0 and 100, got {rate_percent}"
        )));
    }

    let divisor = Decimal::ONE + rate_percent / Decimal::ONE_HUNDRED;
    let net = round2(gross / divisor);
    let tax = round2(gross - net);

    Ok(TaxParts { net, tax })
}
